//! Pipeline barriers.
//!
//! Stages and the accesses they perform are spelled as constants, e.g.
//! `Transfer::WRITE` or `VertexInput::ATTRIBUTE_READ`, so a buffer dependency
//! can't name an access its stage never performs.
//!
//! Image layout transitions work off [`ImageState`] instead: which accesses to
//! flush and which to make visible is a property of the states involved, looked
//! up in a per-state policy table. The caller only supplies the stages.
use crate::{
    Device, ThinHandle,
    buffer::BufferBarrier,
    command_buffer::{OutsideRender, RecordingBuffer},
    image::{Image, ImageResource},
    usage::ImageUsage,
    vk,
};
use core::marker::PhantomData;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct NonZeroStageFlags(core::num::NonZero<u32>);
macro_rules! nonzero_stages {
    {$($name:ident,)+} => {
        impl NonZeroStageFlags {
            $(pub const $name : Self = Self(::core::num::NonZero::new(::ash::vk::PipelineStageFlags::$name.as_raw()).unwrap());)+
        }
    };
}
nonzero_stages! {
    TOP_OF_PIPE,
    VERTEX_INPUT,
    VERTEX_SHADER,
    FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER,
    TRANSFER,
    BOTTOM_OF_PIPE,
    HOST,
    ALL_GRAPHICS,
    ALL_COMMANDS,
}
impl NonZeroStageFlags {
    pub const fn get(self) -> vk::PipelineStageFlags {
        vk::PipelineStageFlags::from_raw(self.0.get())
    }
}
impl core::ops::BitOr for NonZeroStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
/// Structure defining a set of pipeline stages and some or all of the writes
/// they perform, used as the start of a barrier operation.
///
/// This type holds a subset of the accesses available to [`ReadWrite`], and can
/// be trivially converted using [`Into::into()`].
///
/// Write barriers can be combined using the `|` operator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Write {
    stage: NonZeroStageFlags,
    access: vk::AccessFlags,
}
impl Write {
    /// Don't wait for any executions to complete and don't flush any access
    /// caches.
    #[doc(alias = "TOP_OF_PIPE")]
    pub const NOTHING: Self = Self {
        stage: NonZeroStageFlags::TOP_OF_PIPE,
        access: vk::AccessFlags::empty(),
    };
    pub fn stages(self) -> vk::PipelineStageFlags {
        self.stage.get()
    }
    pub fn accesses(self) -> vk::AccessFlags {
        self.access
    }
}
impl core::ops::BitOr for Write {
    type Output = Write;
    fn bitor(self, rhs: Write) -> Write {
        Write {
            stage: self.stage | rhs.stage,
            access: self.access | rhs.access,
        }
    }
}
impl core::ops::BitOr<ReadWrite> for Write {
    type Output = ReadWrite;
    fn bitor(self, rhs: ReadWrite) -> ReadWrite {
        ReadWrite {
            stage: self.stage | rhs.stage,
            access: self.access | rhs.access,
        }
    }
}
impl core::ops::BitOr<Write> for ReadWrite {
    type Output = ReadWrite;
    fn bitor(self, rhs: Write) -> ReadWrite {
        ReadWrite {
            stage: self.stage | rhs.stage,
            access: self.access | rhs.access,
        }
    }
}
impl core::ops::BitOr for ReadWrite {
    type Output = ReadWrite;
    fn bitor(self, rhs: ReadWrite) -> ReadWrite {
        ReadWrite {
            stage: self.stage | rhs.stage,
            access: self.access | rhs.access,
        }
    }
}
/// Structure defining a set of pipeline stages and some or all of the reads and
/// writes they perform, used as the end of a barrier operation.
///
/// This type holds a superset of the accesses available to [`Write`] and can be
/// trivially converted using [`From::from()`].
///
/// ReadWrite barriers can be combined using the `|` operator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ReadWrite {
    stage: NonZeroStageFlags,
    access: vk::AccessFlags,
}
/// Since [`ReadWrite`] is a superset of [`Write`], it is trivially sound to
/// convert.
impl From<Write> for ReadWrite {
    fn from(value: Write) -> Self {
        Self {
            stage: value.stage,
            access: value.access,
        }
    }
}
impl ReadWrite {
    /// Don't block the execution of any stages and don't invalidate any access
    /// caches.
    #[doc(alias = "BOTTOM_OF_PIPE")]
    pub const NOTHING: Self = Self {
        stage: NonZeroStageFlags::BOTTOM_OF_PIPE,
        access: vk::AccessFlags::empty(),
    };
    pub fn stages(self) -> vk::PipelineStageFlags {
        self.stage.get()
    }
    pub fn accesses(self) -> vk::AccessFlags {
        self.access
    }
}
pub trait PipelineStage {
    const STAGE: NonZeroStageFlags;
    /// Block on execution and all write operations it may perform.
    const ALL_WRITE: Write;
    /// Block on execution and all read operations it may perform.
    const ALL_READ: ReadWrite;
    /// Block on execution and all read or write operations it may perform.
    const ALL_READ_WRITE: ReadWrite = ReadWrite {
        stage: NonZeroStageFlags(
            core::num::NonZero::new(Self::ALL_WRITE.stage.0.get() | Self::ALL_READ.stage.0.get())
                .unwrap(),
        ),
        access: vk::AccessFlags::from_raw(
            Self::ALL_WRITE.access.as_raw() | Self::ALL_READ.access.as_raw(),
        ),
    };
    /// Block on execution of this stage, not flushing or invalidating any
    /// access caches.
    const EXECUTE: Write = Write {
        stage: Self::STAGE,
        access: vk::AccessFlags::empty(),
    };
}
macro_rules! stage_accesses {
    {$($stage:ident: $nonzero_stage:ident {
        reads: {
            $($(#[$read_meta:meta])*$read_access_name:ident: $read_access_raw:ident,)*
        },
        writes: {
            $($(#[$write_meta:meta])*$write_access_name:ident: $write_access_raw:ident,)*
        },
    },)+} => {
        $(
            pub struct $stage;
            impl $stage {
                $(
                    $(#[$read_meta])*
                    pub const $read_access_name: ReadWrite = ReadWrite {
                        stage: <$stage as PipelineStage>::STAGE,
                        access: ::ash::vk::AccessFlags::$read_access_raw,
                    };
                )*
                $(
                    $(#[$write_meta])*
                    pub const $write_access_name: Write = Write {
                        stage: <$stage as PipelineStage>::STAGE,
                        access: ::ash::vk::AccessFlags::$write_access_raw,
                    };
                )*
            }
            impl PipelineStage for $stage {
                const STAGE: NonZeroStageFlags = NonZeroStageFlags::$nonzero_stage;
                const ALL_WRITE: Write = Write {
                    stage: Self::STAGE,
                    access: ::ash::vk::AccessFlags::from_raw(0 $(| ::ash::vk::AccessFlags::$write_access_raw.as_raw())*),
                };
                const ALL_READ: ReadWrite = ReadWrite {
                    stage: Self::STAGE,
                    access: ::ash::vk::AccessFlags::from_raw(0 $(| ::ash::vk::AccessFlags::$read_access_raw.as_raw())*),
                };
            }
        )+
    };
}
stage_accesses! {
    VertexInput: VERTEX_INPUT {
        reads: {
            ATTRIBUTE_READ: VERTEX_ATTRIBUTE_READ,
            INDEX_READ: INDEX_READ,
        },
        writes: {},
    },
    VertexShader: VERTEX_SHADER {
        reads: {READ: SHADER_READ, UNIFORM_READ: UNIFORM_READ,},
        writes: {WRITE: SHADER_WRITE,},
    },
    FragmentShader: FRAGMENT_SHADER {
        reads: {READ: SHADER_READ, UNIFORM_READ: UNIFORM_READ, INPUT_ATTACHMENT_READ: INPUT_ATTACHMENT_READ,},
        writes: {WRITE: SHADER_WRITE,},
    },
    EarlyFragmentTests: EARLY_FRAGMENT_TESTS {
        reads: {DEPTH_STENCIL_READ: DEPTH_STENCIL_ATTACHMENT_READ,},
        writes: {DEPTH_STENCIL_WRITE: DEPTH_STENCIL_ATTACHMENT_WRITE,},
    },
    LateFragmentTests: LATE_FRAGMENT_TESTS {
        reads: {DEPTH_STENCIL_READ: DEPTH_STENCIL_ATTACHMENT_READ,},
        writes: {DEPTH_STENCIL_WRITE: DEPTH_STENCIL_ATTACHMENT_WRITE,},
    },
    ColorOutput: COLOR_ATTACHMENT_OUTPUT {
        reads: {READ: COLOR_ATTACHMENT_READ,},
        writes: {WRITE: COLOR_ATTACHMENT_WRITE,},
    },
    Transfer: TRANSFER {
        reads: {READ: TRANSFER_READ,},
        writes: {WRITE: TRANSFER_WRITE,},
    },
    Host: HOST {
        reads: {
            /// Reads through host memory-mapped regions.
            READ: HOST_READ,
        },
        writes: {
            /// Writes through host memory-mapped regions.
            WRITE: HOST_WRITE,
        },
    },
}

/// What an image is being used for, which determines its layout and the
/// accesses a transition in or out of it must cover.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum ImageState {
    /// Contents are garbage. Every image starts here.
    Undefined = 0,
    /// Linear image contents written by the host before first use.
    Preinitialized = 1,
    TransferSrc = 2,
    TransferDst = 3,
    ColorAttachment = 4,
    DepthStencilAttachment = 5,
    ShaderReadOnly = 6,
    /// Anything goes, at some cost. Also the state host reads happen in.
    General = 7,
}
impl ImageState {
    /// Every state, in discriminant order.
    pub const ALL: [Self; 8] = [
        Self::Undefined,
        Self::Preinitialized,
        Self::TransferSrc,
        Self::TransferDst,
        Self::ColorAttachment,
        Self::DepthStencilAttachment,
        Self::ShaderReadOnly,
        Self::General,
    ];
    /// The image layout of this state.
    pub const fn layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::General => vk::ImageLayout::GENERAL,
        }
    }
    /// The policy row for this state.
    pub fn policy(self) -> &'static StatePolicy {
        &POLICY[self as usize]
    }
}

/// How to get in and out of one [`ImageState`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StatePolicy {
    /// Accesses that must be flushed when leaving the state.
    pub flush: vk::AccessFlags,
    /// Accesses that must be made visible when entering the state, or `None`
    /// if the state can't be transitioned into at all.
    pub make_visible: Option<vk::AccessFlags>,
    /// Source scope to use when entering this state from one that flushes
    /// nothing.
    pub fallback_flush: vk::AccessFlags,
}
const fn access(flags: &[vk::AccessFlags]) -> vk::AccessFlags {
    let mut raw = 0;
    let mut i = 0;
    while i < flags.len() {
        raw |= flags[i].as_raw();
        i += 1;
    }
    vk::AccessFlags::from_raw(raw)
}
const NONE: vk::AccessFlags = vk::AccessFlags::empty();
/// Indexed by `ImageState as usize`.
static POLICY: [StatePolicy; 8] = [
    // Undefined
    StatePolicy {
        flush: NONE,
        make_visible: None,
        fallback_flush: NONE,
    },
    // Preinitialized
    StatePolicy {
        flush: vk::AccessFlags::HOST_WRITE,
        make_visible: None,
        fallback_flush: NONE,
    },
    // TransferSrc
    StatePolicy {
        flush: vk::AccessFlags::TRANSFER_READ,
        make_visible: Some(vk::AccessFlags::TRANSFER_READ),
        fallback_flush: NONE,
    },
    // TransferDst
    StatePolicy {
        flush: vk::AccessFlags::TRANSFER_WRITE,
        make_visible: Some(vk::AccessFlags::TRANSFER_WRITE),
        fallback_flush: NONE,
    },
    // ColorAttachment
    StatePolicy {
        flush: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        make_visible: Some(access(&[
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ])),
        fallback_flush: NONE,
    },
    // DepthStencilAttachment
    StatePolicy {
        flush: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        make_visible: Some(access(&[
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ])),
        fallback_flush: NONE,
    },
    // ShaderReadOnly
    StatePolicy {
        flush: vk::AccessFlags::SHADER_READ,
        make_visible: Some(vk::AccessFlags::SHADER_READ),
        fallback_flush: access(&[vk::AccessFlags::HOST_WRITE, vk::AccessFlags::TRANSFER_WRITE]),
    },
    // General
    StatePolicy {
        flush: vk::AccessFlags::MEMORY_WRITE,
        make_visible: Some(access(&[
            vk::AccessFlags::MEMORY_READ,
            vk::AccessFlags::MEMORY_WRITE,
        ])),
        fallback_flush: NONE,
    },
];

/// A transition into a state that can't be entered, e.g. back into
/// [`ImageState::Undefined`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
#[error("unsupported image state transition {from:?} -> {to:?}")]
pub struct UnsupportedTransition {
    pub from: ImageState,
    pub to: ImageState,
}

/// The `(source, destination)` access masks of a transition between two
/// states.
pub fn access_scopes(
    from: ImageState,
    to: ImageState,
) -> Result<(vk::AccessFlags, vk::AccessFlags), UnsupportedTransition> {
    let leaving = from.policy();
    let entering = to.policy();
    let dst = entering
        .make_visible
        .ok_or(UnsupportedTransition { from, to })?;
    let src = if leaving.flush.is_empty() {
        entering.fallback_flush
    } else {
        leaving.flush
    };
    Ok((src, dst))
}

/// A planned image layout transition, ready to be recorded with
/// [`Device::record_barrier`].
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier<'a> {
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: ImageState,
    new: ImageState,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stages: NonZeroStageFlags,
    dst_stages: NonZeroStageFlags,
    _image: PhantomData<&'a ()>,
}
impl ImageBarrier<'_> {
    pub fn old_state(&self) -> ImageState {
        self.old
    }
    pub fn new_state(&self) -> ImageState {
        self.new
    }
    /// Writes made available before the transition.
    pub fn src_access(&self) -> vk::AccessFlags {
        self.src_access
    }
    /// Accesses the transition is made visible to.
    pub fn dst_access(&self) -> vk::AccessFlags {
        self.dst_access
    }
    pub fn src_stages(&self) -> vk::PipelineStageFlags {
        self.src_stages.get()
    }
    pub fn dst_stages(&self) -> vk::PipelineStageFlags {
        self.dst_stages.get()
    }
    pub fn range(&self) -> vk::ImageSubresourceRange {
        self.range
    }
    fn vk(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .image(self.image)
            .subresource_range(self.range)
            .old_layout(self.old.layout())
            .new_layout(self.new.layout())
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
    }
}

/// Plan a transition of `range` of `image` from `old` to `new`. The accesses
/// come from the policy table, the stages from the caller.
pub fn plan_image_barrier<'a, Usage: ImageUsage>(
    image: &'a Image<Usage>,
    range: vk::ImageSubresourceRange,
    old: ImageState,
    new: ImageState,
    src_stages: NonZeroStageFlags,
    dst_stages: NonZeroStageFlags,
) -> Result<ImageBarrier<'a>, UnsupportedTransition> {
    let (src_access, dst_access) = access_scopes(old, new)?;
    Ok(ImageBarrier {
        // Safety: only read, the layout is tracked by the caller.
        image: unsafe { image.handle() },
        range,
        old,
        new,
        src_access,
        dst_access,
        src_stages,
        dst_stages,
        _image: PhantomData,
    })
}

/// Anything [`Device::record_barrier`] can record.
#[derive(Clone, Copy, Debug)]
pub enum Barrier<'a> {
    Buffer(BufferBarrier<'a>),
    Image(ImageBarrier<'a>),
}
impl<'a> From<BufferBarrier<'a>> for Barrier<'a> {
    fn from(value: BufferBarrier<'a>) -> Self {
        Self::Buffer(value)
    }
}
impl<'a> From<ImageBarrier<'a>> for Barrier<'a> {
    fn from(value: ImageBarrier<'a>) -> Self {
        Self::Image(value)
    }
}

impl Device<'_> {
    /// Record a pipeline barrier. Barriers can't be recorded inside a render
    /// pass here, there are no self-dependencies in anything this crate draws.
    pub unsafe fn record_barrier<'b>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        barrier: impl Into<Barrier<'b>>,
    ) -> &Self {
        match barrier.into() {
            Barrier::Buffer(barrier) => {
                log::trace!(
                    "buffer barrier {:?}/{:?} -> {:?}/{:?}",
                    barrier.src.stages(),
                    barrier.src.accesses(),
                    barrier.dst.stages(),
                    barrier.dst.accesses(),
                );
                self.ash.cmd_pipeline_barrier(
                    buffer.handle(),
                    barrier.src.stages(),
                    barrier.dst.stages(),
                    vk::DependencyFlags::empty(),
                    &[],
                    &[vk::BufferMemoryBarrier::default()
                        .buffer(barrier.buffer)
                        .offset(barrier.offset)
                        .size(barrier.len)
                        .src_access_mask(barrier.src.accesses())
                        .dst_access_mask(barrier.dst.accesses())
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)],
                    &[],
                );
            }
            Barrier::Image(barrier) => {
                log::trace!(
                    "image barrier {:?} -> {:?} ({:?} -> {:?})",
                    barrier.old,
                    barrier.new,
                    barrier.src_access,
                    barrier.dst_access,
                );
                self.ash.cmd_pipeline_barrier(
                    buffer.handle(),
                    barrier.src_stages(),
                    barrier.dst_stages(),
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier.vk()],
                );
            }
        }
        self
    }
    /// Transition every subresource of `image` from its tracked state into
    /// `new`, and track the new state.
    ///
    /// Nothing is recorded if the transition is rejected.
    pub unsafe fn transition<Usage: ImageUsage>(
        &self,
        buffer: &mut RecordingBuffer<'_, OutsideRender>,
        image: &mut ImageResource<Usage>,
        new: ImageState,
        src_stages: NonZeroStageFlags,
        dst_stages: NonZeroStageFlags,
    ) -> Result<&Self, UnsupportedTransition> {
        let barrier = plan_image_barrier(
            image.image(),
            image.subresource_range(),
            image.state(),
            new,
            src_stages,
            dst_stages,
        )?;
        self.record_barrier(buffer, barrier);
        image.set_state(new);
        Ok(self)
    }
}
