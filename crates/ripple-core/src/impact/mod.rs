pub mod diff;
pub mod llm;
pub mod propagator;
