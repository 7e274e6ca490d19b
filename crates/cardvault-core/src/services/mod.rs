//! Long-lived handles shared by the client-side components.

mod replica;

pub use replica::ReplicaService;
