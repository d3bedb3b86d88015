// Rationale: consume() takes the context by value, so any later access is a
// use-after-move the compiler rejects.
use evidence_kernel::{FrameContext, FrameId};

fn main() {
    let ctx = FrameContext::enter(
        FrameId { id: 1, created_ms: 0 },
        1,
        Vec::new(),
        false,
    );
    let _outputs = ctx.consume();
    let _late = ctx.samples("too_late");
}
