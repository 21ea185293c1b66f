pub mod breakpoints;
pub mod memory;
pub mod raw;
pub mod stack;
pub mod variables;
