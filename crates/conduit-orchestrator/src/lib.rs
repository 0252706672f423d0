pub mod transitions;

pub use transitions::*;
