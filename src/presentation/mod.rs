pub mod assembler;
pub mod bridge;

pub use assembler::{assemble, synthesize_unclaimed_chapter_payloads, ViewPayload};
pub use bridge::{BridgeTask, PresentationBridge, RenderedSection};
