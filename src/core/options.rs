//! Runtime configuration for the interpreter and the worker context.

/// Interpreter settings, fixed for one render request.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorOptions {
    /// Operators per streamed chunk
    pub chunk_size: usize,

    /// Maximum nesting of form XObjects and Type 3 glyph procedures
    pub max_form_depth: usize,

    /// Absorb per-operator faults instead of failing the request
    pub ignore_errors: bool,

    /// Images with more pixels than this are replaced by a placeholder
    pub max_image_pixels: u64,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        EvaluatorOptions {
            chunk_size: 1000,
            max_form_depth: 16,
            ignore_errors: true,
            max_image_pixels: 1 << 26,
        }
    }
}

impl EvaluatorOptions {
    /// Same options with a different chunk size (at least one operator).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Settings for the isolated worker context.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptions {
    /// Threads in the worker's tokio runtime
    pub worker_threads: usize,

    /// Depth of the controller → worker command queue
    pub channel_capacity: usize,

    /// Chunks buffered per render request before the worker waits
    pub chunk_channel_capacity: usize,

    pub evaluator: EvaluatorOptions,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            worker_threads: 2,
            channel_capacity: 32,
            chunk_channel_capacity: 8,
            evaluator: EvaluatorOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = WorkerOptions::default();
        assert_eq!(options.evaluator.chunk_size, 1000);
        assert_eq!(options.evaluator.max_form_depth, 16);
        assert!(options.evaluator.ignore_errors);
    }

    #[test]
    fn test_chunk_size_floor() {
        let options = EvaluatorOptions::default().with_chunk_size(0);
        assert_eq!(options.chunk_size, 1);
    }
}
