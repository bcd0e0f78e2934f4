use std::sync::Arc;

use anyhow::{Context, Result};
use notes_auth::{OAuthService, TokenService};
use reqwest::Client as HttpClient;
use tokio::net::TcpListener;

use crate::api::config::{ApiConfig, ApiSecrets};
use crate::api::endpoint::ApiEndpoint;
use crate::redis::RedisClient;

pub struct ApiStateBuilder<MandatoryFields = (HttpClient, RedisClient)> {
    config: ApiConfig,
    mandatory_fields: MandatoryFields,
}

impl ApiStateBuilder {
    pub fn build(self) -> Result<ApiState> {
        let secrets = ApiSecrets::from_env()?;
        self.build_with_secrets(&secrets)
    }

    pub fn build_with_secrets(self, secrets: &ApiSecrets) -> Result<ApiState> {
        let (http_client, redis_client) = self.mandatory_fields;
        let config = self.config;

        let oauth = OAuthService::new(secrets.oauth_config(&config.oauth))
            .context("invalid OAuth configuration")?
            .with_http_client(http_client)
            .with_state_store(Arc::new(redis_client.clone()));

        let tokens = TokenService::new(secrets.jwt_secret.as_bytes(), config.token.clone())
            .context("invalid token configuration")?
            .with_blacklist(Arc::new(redis_client.clone()));

        Ok(ApiState {
            inner: Arc::new(Inner {
                config,
                oauth,
                tokens,
                redis_client,
            }),
        })
    }
}

impl<T2> ApiStateBuilder<((), T2)> {
    pub fn with_http_client(self, http_client: HttpClient) -> ApiStateBuilder<(HttpClient, T2)> {
        let (_, redis_client) = self.mandatory_fields;

        ApiStateBuilder {
            config: self.config,
            mandatory_fields: (http_client, redis_client),
        }
    }
}

impl<T1> ApiStateBuilder<(T1, ())> {
    pub fn with_redis_client(
        self,
        redis_client: RedisClient,
    ) -> ApiStateBuilder<(T1, RedisClient)> {
        let (http_client, _) = self.mandatory_fields;

        ApiStateBuilder {
            config: self.config,
            mandatory_fields: (http_client, redis_client),
        }
    }
}

impl<T1, T2> ApiStateBuilder<(T1, T2)> {
    pub fn with_config(self, config: ApiConfig) -> ApiStateBuilder<(T1, T2)> {
        ApiStateBuilder { config, ..self }
    }
}

#[derive(Clone)]
#[repr(transparent)]
pub struct ApiState {
    inner: Arc<Inner>,
}

impl ApiState {
    pub fn builder() -> ApiStateBuilder<((), ())> {
        ApiStateBuilder {
            config: ApiConfig::default(),
            mandatory_fields: ((), ()),
        }
    }

    pub async fn bind_socket(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config().listen_addr).await
    }

    pub async fn bind_endpoint(&self) -> Result<ApiEndpoint> {
        ApiEndpoint::builder().bind(self.clone()).await
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn oauth(&self) -> &OAuthService {
        &self.inner.oauth
    }

    pub fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    pub fn redis_client(&self) -> &RedisClient {
        &self.inner.redis_client
    }
}

struct Inner {
    config: ApiConfig,
    oauth: OAuthService,
    tokens: TokenService,
    redis_client: RedisClient,
}
