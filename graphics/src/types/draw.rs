//! GPU-layout argument structs for indirect work submission.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Arguments for a non-indexed indirect draw call.
///
/// `#[repr(C)]` to match the GPU argument-buffer layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    /// Number of vertices to draw.
    pub vertex_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first vertex.
    pub first_vertex: u32,
    /// Instance id of the first instance.
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create new indirect draw arguments.
    pub fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

const_assert_eq!(std::mem::size_of::<DrawIndirectArgs>(), 16);

/// Arguments for an indexed indirect draw call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first index.
    pub first_index: u32,
    /// Value added to each index before vertex lookup.
    pub base_vertex: i32,
    /// Instance id of the first instance.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

const_assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);

/// Arguments for an indirect compute dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DispatchArgs {
    /// Thread groups in x.
    pub group_count_x: u32,
    /// Thread groups in y.
    pub group_count_y: u32,
    /// Thread groups in z.
    pub group_count_z: u32,
}

impl DispatchArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

const_assert_eq!(std::mem::size_of::<DispatchArgs>(), 12);
