// Rationale: a frame context lives exactly one frame; duplicating it would
// let outputs escape their owner.
use evidence_kernel::FrameContext;

fn main() {
    let ctx: FrameContext = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    let _twin = ctx.clone();
}
