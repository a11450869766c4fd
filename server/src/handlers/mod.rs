// HTTP handlers module structure

pub(crate) mod evaluation_handlers;
pub(crate) mod health_handlers;
pub(crate) mod upload_handlers;
