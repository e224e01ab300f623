use super::commands::CreateUser;
use super::repository::UserRepository;
use bunstone::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateUserDto {
    #[validate(length(min = 2, message = "name must have at least 2 characters"))]
    pub name: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
}

#[derive(Injectable)]
pub struct UserController {
    users: Arc<dyn UserRepository>,
    commands: Arc<CommandBus>,
}

#[derive(Injectable)]
pub struct ApiKeyGuard {
    config: Arc<ConfigService>,
}

#[async_trait]
impl Guard for ApiKeyGuard {
    async fn validate(&self, request: &RequestContext) -> bool {
        match self.config.get("API_KEY") {
            Some(expected) => request.header("x-api-key") == Some(expected.as_str()),
            None => true,
        }
    }
}

pub fn routes() -> Controller<UserController> {
    Controller::<UserController>::new("users")
        .rate_limit(RateLimitConfig::new().max(60).window(Duration::from_secs(60)))
        .route(Route::get("find_all", "/"), |ctrl, _| async move {
            Ok::<_, RequestError>(serde_json::to_value(ctrl.users.all())?)
        })
        .route(
            Route::get("find_one", ":id").param(ParamDescriptor::path_param().key("id").schema(ParseIntPipe::field("id"))),
            |ctrl, args| async move {
                let id = args.value(0).and_then(Value::as_u64).unwrap_or_default();
                let user = ctrl
                    .users
                    .find(id)
                    .ok_or_else(|| HttpException::not_found(Some(json!({ "message": format!("User {id} not found") }))))?;
                Ok::<_, RequestError>(serde_json::to_value(user)?)
            },
        )
        .route(
            Route::post("create", "/")
                .guard::<ApiKeyGuard>()
                .param(ParamDescriptor::body().validate::<CreateUserDto>()),
            |ctrl, args| async move {
                let dto: CreateUserDto = args.json(0)?;
                let user = ctrl
                    .commands
                    .execute(CreateUser {
                        name: dto.name,
                        email: dto.email,
                    })
                    .await?;
                Ok::<_, RequestError>(HttpException::created(serde_json::to_value(user)?))
            },
        )
}
