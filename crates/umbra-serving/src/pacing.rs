//! Pass-through pacing

/// Keep a selection iff the draw in `[0, 1)` falls under the pass-through rate
pub fn should_serve(draw: f64, pass_through_rate: f64) -> bool {
    draw < pass_through_rate
}
