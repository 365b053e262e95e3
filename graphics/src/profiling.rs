//! Profiling support via Tracy.
//!
//! Instrumentation is enabled through the `profiling` Cargo feature; when
//! the feature is off every macro compiles to a no-op with zero runtime
//! overhead.
//!
//! # Usage
//!
//! ```ignore
//! use vermilion_graphics::profiling::{frame_mark, profile_scope};
//!
//! fn record_frame() {
//!     profile_scope!("record_frame");
//!     // ... record ...
//!     frame_mark!();
//! }
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, Span};

/// Profile a named scope until the end of the enclosing block.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        #[cfg(feature = "profiling")]
        let _profiling_span = $crate::profiling::Client::running()
            .map(|client| client.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}

/// Mark a frame boundary for frame-time analysis.
#[macro_export]
macro_rules! frame_mark {
    () => {
        #[cfg(feature = "profiling")]
        if let Some(client) = $crate::profiling::Client::running() {
            client.frame_mark();
        }
    };
}

pub use crate::frame_mark;
pub use crate::profile_scope;

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_compile() {
        // Must compile to valid statements regardless of the feature state.
        crate::profile_scope!("test_scope");
        crate::frame_mark!();
    }
}
