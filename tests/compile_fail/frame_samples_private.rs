// Rationale: frame input samples are private; modules read them only
// through the ownership-checked accessor.
use evidence_kernel::FrameContext;

fn main() {
    let ctx: FrameContext = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    let _samples = ctx.samples;
}
