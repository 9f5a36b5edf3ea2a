use crate::handle::ResourceKind;
use crate::{RenderGraphError, Result};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// How a resource is accessed by a pass.
    ///
    /// Read bits may be combined freely with each other. A write bit must be
    /// the only bit set, and `COMMON`/`PRESENT` can never share a value with
    /// any other bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 1 << 0;
        const PRESENT = 1 << 1;
        const VERTEX_BUFFER = 1 << 2;
        const INDEX_BUFFER = 1 << 3;
        const CONSTANT_BUFFER = 1 << 4;
        const INDIRECT_ARGUMENT = 1 << 5;
        const SHADER_RESOURCE = 1 << 6;
        const COPY_SOURCE = 1 << 7;
        const DEPTH_READ = 1 << 8;
        const RENDER_TARGET = 1 << 9;
        const DEPTH_WRITE = 1 << 10;
        const COPY_DEST = 1 << 11;
        const UNORDERED_ACCESS = 1 << 12;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    Empty,
    UnknownBits,
    MultipleWrites,
    WriteCombinedWithOther,
    ExclusiveCombined,
    NotApplicableToKind,
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            StateViolation::Empty => "no state bit set",
            StateViolation::UnknownBits => "unknown state bits",
            StateViolation::MultipleWrites => "more than one write state",
            StateViolation::WriteCombinedWithOther => "write state combined with another state",
            StateViolation::ExclusiveCombined => "COMMON/PRESENT combined with another state",
            StateViolation::NotApplicableToKind => "state not applicable to this resource kind",
        };
        f.write_str(message)
    }
}

impl ResourceState {
    pub const READ_MASK: Self = Self::VERTEX_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::CONSTANT_BUFFER)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::SHADER_RESOURCE)
        .union(Self::COPY_SOURCE)
        .union(Self::DEPTH_READ);

    pub const WRITE_MASK: Self = Self::RENDER_TARGET
        .union(Self::DEPTH_WRITE)
        .union(Self::COPY_DEST)
        .union(Self::UNORDERED_ACCESS);

    pub const EXCLUSIVE_MASK: Self = Self::COMMON.union(Self::PRESENT);

    const TEXTURE_ONLY: Self = Self::RENDER_TARGET
        .union(Self::DEPTH_WRITE)
        .union(Self::DEPTH_READ)
        .union(Self::PRESENT);

    const BUFFER_ONLY: Self = Self::VERTEX_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::CONSTANT_BUFFER)
        .union(Self::INDIRECT_ARGUMENT);

    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_MASK)
    }

    pub fn is_read_only(self) -> bool {
        !self.is_empty() && Self::READ_MASK.contains(self)
    }

    pub fn access(self) -> Access {
        if self.is_write() {
            Access::Write
        } else {
            Access::Read
        }
    }

    pub fn check(self) -> std::result::Result<(), StateViolation> {
        if self.is_empty() {
            return Err(StateViolation::Empty);
        }
        if Self::from_bits(self.bits()).is_none() {
            return Err(StateViolation::UnknownBits);
        }

        let writes = self.intersection(Self::WRITE_MASK);
        if writes.bits().count_ones() > 1 {
            return Err(StateViolation::MultipleWrites);
        }
        if !writes.is_empty() && writes != self {
            return Err(StateViolation::WriteCombinedWithOther);
        }

        let exclusive = self.intersection(Self::EXCLUSIVE_MASK);
        if !exclusive.is_empty() && self.bits().count_ones() > 1 {
            return Err(StateViolation::ExclusiveCombined);
        }

        Ok(())
    }

    pub fn check_for(self, kind: ResourceKind) -> std::result::Result<(), StateViolation> {
        self.check()?;
        let forbidden = match kind {
            ResourceKind::Texture => Self::BUFFER_ONLY,
            ResourceKind::Buffer => Self::TEXTURE_ONLY,
        };
        if self.intersects(forbidden) {
            return Err(StateViolation::NotApplicableToKind);
        }
        Ok(())
    }

    pub fn validate_for(self, kind: ResourceKind, resource: &str) -> Result<Self> {
        self.check_for(kind)
            .map(|_| self)
            .map_err(|violation| RenderGraphError::InvalidStateCombination {
                resource: resource.to_string(),
                state: self,
                violation,
            })
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}
