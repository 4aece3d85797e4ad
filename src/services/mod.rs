// Order lifecycle core
pub mod assignments;
pub mod orders;
pub mod payments;
pub mod status;
pub mod visibility;

// Agent directory
pub mod agents;

// Collaborator interfaces (catalog, address book, cart)
pub mod catalog;
