// Order lifecycle core
pub mod delivery_agent;
pub mod order;
pub mod order_item;

// Collaborator tables owned by the catalog, address book and cart subsystems
pub mod address;
pub mod cart_item;
pub mod product;
