use std::sync::Arc;

use domain::{DomainError, NewUser, RepositoryError, User, UserEmail, UserId, Username};

use crate::{
    clock::Clock,
    error::ApplicationError,
    pagination::{Page, PageRequest},
    password::PasswordHasher,
    repository::UserRepository,
};

/// bcrypt 只使用前 72 字节。
const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub username: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;
        validate_password(&request.password)?;

        let repository = &self.deps.user_repository;
        if repository.find_by_username(&username).await?.is_some()
            || repository.find_by_email(&email).await?.is_some()
        {
            return Err(DomainError::UserAlreadyExists.into());
        }

        let password = self.deps.password_hasher.hash(&request.password).await?;
        let display_name = request
            .display_name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty());

        let new_user = NewUser {
            username,
            display_name,
            email,
            password,
            created_at: self.deps.clock.now(),
        };

        // 并发注册时以存储层的唯一约束为准
        match repository.create(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, username = %user.username, "user registered");
                Ok(user)
            }
            Err(RepositoryError::Conflict(_)) => Err(DomainError::UserAlreadyExists.into()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let username =
            Username::parse(request.username).map_err(|_| ApplicationError::Authentication)?;
        let user = self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .ok_or(ApplicationError::Authentication)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(ApplicationError::Authentication);
        }

        if !user.is_active {
            return Err(ApplicationError::Authentication);
        }

        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn list_users(&self, page: PageRequest) -> Result<Page<User>, ApplicationError> {
        Ok(self.deps.user_repository.list(page).await?)
    }
}

fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.is_empty() {
        return Err(DomainError::invalid_argument("password", "cannot be empty"));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(DomainError::invalid_argument(
            "password",
            "must be at most 72 bytes",
        ));
    }
    Ok(())
}
