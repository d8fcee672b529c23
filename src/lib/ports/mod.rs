pub mod datastore;

pub use datastore::{DatastoreError, InsertOutcome, TreeDatastore, TreeFilter};
