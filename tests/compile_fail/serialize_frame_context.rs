// Rationale: frame contexts must stay non-serializable so inputs cannot be
// exported past the frame boundary.
use evidence_kernel::FrameContext;

fn main() {
    let ctx: FrameContext = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    let _json = serde_json::to_string(&ctx).unwrap();
}
