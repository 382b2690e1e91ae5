//! Progress reporting seam between the pipeline and its caller.
//!
//! The sink only forwards; monotonicity of the fractions is upheld by the
//! assembler, not enforced here.

/// Receives fractional-completion events (`0.0..=1.0`) with an optional
/// human-readable message. Invoked synchronously from the pipeline.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: Option<&str>);
}

/// Sink that discards all events.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _fraction: f64, _message: Option<&str>) {}
}

/// Any matching closure is a sink, so the CLI can pass a plain callback.
impl<F> ProgressSink for F
where
    F: Fn(f64, Option<&str>) + Send + Sync,
{
    fn report(&self, fraction: f64, message: Option<&str>) {
        self(fraction, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_sink_receives_events() {
        let seen: Mutex<Vec<(f64, Option<String>)>> = Mutex::new(Vec::new());
        let sink = |fraction: f64, message: Option<&str>| {
            seen.lock()
                .unwrap()
                .push((fraction, message.map(str::to_string)));
        };
        sink.report(0.5, Some("halfway"));
        sink.report(1.0, None);
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (0.5, Some("halfway".to_string())));
        assert_eq!(events[1], (1.0, None));
    }
}
