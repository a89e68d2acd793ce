//! JWT 认证
//!
//! HS256 签名，`sub` 存放用户 id 的十进制字符串。HTTP 接口和实时连接共用同一个
//! [`JwtService`]，后者通过 [`TokenVerifier`] 注入到应用层。

use application::{TokenError, TokenVerifier};
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64, // Unix 时间戳
}

#[derive(Clone)]
pub struct JwtService {
    expiration: chrono::Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            expiration: chrono::Duration::minutes(config.expiration_minutes),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + self.expiration;
        self.encode_claims(&Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
        })
    }

    pub(crate) fn encode_claims(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "token generation failed");
            ApiError::internal_server_error("token generation failed")
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<UserId, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::invalid(err.to_string()),
            }
        })?;

        data.claims
            .sub
            .parse::<i64>()
            .map(UserId::new)
            .map_err(|_| TokenError::invalid("subject is not a user id"))
    }

    /// 从 `Authorization: Bearer <token>` 头中解析出用户。
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        self.verify_token(token).map_err(|err| match err {
            TokenError::Expired => ApiError::unauthorized("Token expired"),
            TokenError::Invalid(_) => ApiError::unauthorized("Could not validate credentials"),
        })
    }
}

impl TokenVerifier for JwtService {
    fn verify(&self, credential: &str) -> Result<UserId, TokenError> {
        self.verify_token(credential)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".into(),
        }
    }
}
