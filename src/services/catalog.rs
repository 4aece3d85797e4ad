//! Narrow interfaces onto the catalog, address book and cart subsystems.
//!
//! The order lifecycle only reads products and addresses and clears carts;
//! the default implementations talk to the shared database directly.

use crate::{
    db::DbPool,
    entities::{address, cart_item, product},
    errors::ServiceError,
};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError>;

    /// Batch lookup; unknown ids are silently absent from the result.
    async fn get_products(&self, ids: &[Uuid]) -> Result<Vec<product::Model>, ServiceError>;
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn get_address(&self, id: Uuid) -> Result<Option<address::Model>, ServiceError>;

    async fn get_addresses(&self, ids: &[Uuid]) -> Result<Vec<address::Model>, ServiceError>;
}

#[async_trait]
pub trait Cart: Send + Sync {
    /// Empties the customer's cart, returning the number of removed lines.
    async fn clear(&self, customer_id: Uuid) -> Result<u64, ServiceError>;
}

#[derive(Clone)]
pub struct DbProductCatalog {
    db: Arc<DbPool>,
}

impl DbProductCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductCatalog for DbProductCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %id, "Failed to fetch product");
                ServiceError::DatabaseError(e)
            })
    }

    async fn get_products(&self, ids: &[Uuid]) -> Result<Vec<product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        product::Entity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to batch fetch products");
                ServiceError::DatabaseError(e)
            })
    }
}

#[derive(Clone)]
pub struct DbAddressBook {
    db: Arc<DbPool>,
}

impl DbAddressBook {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AddressBook for DbAddressBook {
    async fn get_address(&self, id: Uuid) -> Result<Option<address::Model>, ServiceError> {
        address::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, address_id = %id, "Failed to fetch address");
                ServiceError::DatabaseError(e)
            })
    }

    async fn get_addresses(&self, ids: &[Uuid]) -> Result<Vec<address::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        address::Entity::find()
            .filter(address::Column::Id.is_in(ids.iter().copied()))
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to batch fetch addresses");
                ServiceError::DatabaseError(e)
            })
    }
}

#[derive(Clone)]
pub struct DbCart {
    db: Arc<DbPool>,
}

impl DbCart {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Cart for DbCart {
    async fn clear(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(customer_id))
            .exec(&*self.db)
            .await
            .map(|res| res.rows_affected)
            .map_err(|e| {
                error!(error = %e, customer_id = %customer_id, "Failed to clear cart");
                ServiceError::DatabaseError(e)
            })
    }
}
