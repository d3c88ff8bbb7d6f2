pub mod client;
pub mod prompts;
pub mod resolver;
pub mod validation;

pub use client::*;
pub use prompts::*;
pub use resolver::*;
pub use validation::*;
