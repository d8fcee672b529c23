pub mod index;
pub mod leaf;
pub mod merkle;
pub mod record;
pub mod tree;
