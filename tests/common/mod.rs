#![allow(dead_code, unused_imports)]

pub use taskdag_test_utils::builders;
pub use taskdag_test_utils::fake_job;
pub use taskdag_test_utils::recording;
pub use taskdag_test_utils::{init_tracing, with_timeout};
