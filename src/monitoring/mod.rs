/*!
 * Monitoring
 * Structured tracing for the block manager
 */

mod tracer;

pub use tracer::{
    init_tracing, span_operation, try_init_tracing, try_init_tracing_with, OperationSpan,
    TraceFormat, TRACE_JSON_ENV,
};
