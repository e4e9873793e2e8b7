pub mod store;

pub use store::{JsonStore, Persist};
