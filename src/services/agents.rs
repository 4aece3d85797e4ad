use crate::{
    auth::{hash_password, verify_password, AuthService, Role},
    db::DbPool,
    entities::delivery_agent::{self, AgentStatus, Entity as AgentEntity, Model as AgentModel},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterAgentRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 10, max = 15, message = "Phone must be 10 to 15 characters"))]
    pub phone: String,
    #[validate(length(min = 6, max = 128, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AgentLoginRequest {
    #[validate(length(min = 1))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentResponse {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<AgentModel> for AgentResponse {
    fn from(model: AgentModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            phone: model.phone,
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentSession {
    pub token: String,
    pub agent: AgentResponse,
}

/// Delivery agent directory: registration, login and availability
#[derive(Clone)]
pub struct AgentService {
    db_pool: Arc<DbPool>,
    auth: Arc<AuthService>,
}

impl AgentService {
    pub fn new(db_pool: Arc<DbPool>, auth: Arc<AuthService>) -> Self {
        Self { db_pool, auth }
    }

    #[instrument(skip(self, request), fields(phone = %request.phone))]
    pub async fn register(&self, request: RegisterAgentRequest) -> Result<AgentModel, ServiceError> {
        request.validate()?;

        if self.find_by_phone(&request.phone).await?.is_some() {
            return Err(ServiceError::InvalidInput(
                "An agent with this phone number already exists".to_string(),
            ));
        }

        let agent = delivery_agent::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            phone: Set(request.phone.clone()),
            password_hash: Set(hash_password(&request.password)?),
            status: Set(AgentStatus::Available),
            created_at: Set(Utc::now()),
        };

        let inserted = agent
            .insert(&*self.db_pool)
            .await
            .map_err(|e| match e.sql_err() {
                // lost a race with a concurrent registration
                Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::InvalidInput(
                    "An agent with this phone number already exists".to_string(),
                ),
                _ => {
                    error!(error = %e, "Failed to insert agent");
                    ServiceError::DatabaseError(e)
                }
            })?;

        info!(agent_id = %inserted.id, "Delivery agent registered");
        Ok(inserted)
    }

    #[instrument(skip(self, request), fields(phone = %request.phone))]
    pub async fn login(&self, request: AgentLoginRequest) -> Result<AgentSession, ServiceError> {
        request.validate()?;

        let agent = match self.find_by_phone(&request.phone).await? {
            Some(agent) if verify_password(&request.password, &agent.password_hash) => agent,
            _ => {
                warn!("Agent login rejected");
                return Err(ServiceError::Unauthorized(
                    "Invalid phone or password".to_string(),
                ));
            }
        };

        if agent.status == AgentStatus::Inactive {
            return Err(ServiceError::Forbidden(
                "Agent account is inactive".to_string(),
            ));
        }

        let token = self.auth.issue_token(agent.id, Role::Agent)?;
        info!(agent_id = %agent.id, "Agent logged in");
        Ok(AgentSession {
            token,
            agent: agent.into(),
        })
    }

    pub async fn get(&self, agent_id: Uuid) -> Result<AgentModel, ServiceError> {
        AgentEntity::find_by_id(agent_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Agent {} not found", agent_id)))
    }

    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        agent_id: Uuid,
        status: AgentStatus,
    ) -> Result<AgentModel, ServiceError> {
        let updated = AgentEntity::update_many()
            .col_expr(delivery_agent::Column::Status, Expr::value(status))
            .filter(delivery_agent::Column::Id.eq(agent_id))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to update agent status");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;
        if updated == 0 {
            return Err(ServiceError::NotFound(format!("Agent {} not found", agent_id)));
        }
        info!(status = %status, "Agent status updated");
        self.get(agent_id).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<AgentModel>, ServiceError> {
        AgentEntity::find()
            .filter(delivery_agent::Column::Phone.eq(phone))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up agent by phone");
                ServiceError::DatabaseError(e)
            })
    }
}
