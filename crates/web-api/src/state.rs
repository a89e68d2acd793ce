use std::sync::Arc;

use application::{
    ChatService, ChatServiceDependencies, Clock, RealtimeService, RealtimeServiceDependencies,
    SystemClock, UserService, UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub realtime: Arc<RealtimeService>,
    pub jwt_service: Arc<JwtService>,
    /// 未安装 recorder 时 `/metrics` 返回 404
    pub metrics: Option<PrometheusHandle>,
    pub outbound_buffer: usize,
}

impl AppState {
    /// 用同一组存储适配器装配所有服务，HTTP 与实时连接共享同一个 `JwtService`。
    pub fn build(
        infra: &Infrastructure,
        config: &AppConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let jwt_service = Arc::new(JwtService::new(&config.jwt));

        let user_service = UserService::new(UserServiceDependencies {
            user_repository: infra.user_repository.clone(),
            password_hasher: infra.password_hasher.clone(),
            clock: clock.clone(),
        });
        let chat_service = ChatService::new(ChatServiceDependencies {
            room_repository: infra.room_repository.clone(),
            member_repository: infra.member_repository.clone(),
            message_repository: infra.message_repository.clone(),
            user_repository: infra.user_repository.clone(),
            clock: clock.clone(),
        });
        let realtime = RealtimeService::new(RealtimeServiceDependencies {
            token_verifier: jwt_service.clone(),
            user_repository: infra.user_repository.clone(),
            room_repository: infra.room_repository.clone(),
            member_repository: infra.member_repository.clone(),
            message_repository: infra.message_repository.clone(),
            clock,
            send_timeout: config.realtime.send_timeout(),
        });

        Self {
            user_service: Arc::new(user_service),
            chat_service: Arc::new(chat_service),
            realtime: Arc::new(realtime),
            jwt_service,
            metrics,
            outbound_buffer: config.realtime.outbound_buffer,
        }
    }
}
