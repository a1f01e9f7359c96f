use crate::AppGateway;

pub(crate) struct ServerState {
    pub(crate) gateway: AppGateway,
}
