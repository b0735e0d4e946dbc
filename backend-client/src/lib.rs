mod client;
mod retry;

pub use client::Client;
pub use client::DEFAULT_API_URL;
pub use client::METHOD_NAME_HEADER;
pub use client::PLUGIN_NAME_HEADER;
pub use client::PUBLIC_KEY_HEADER;
pub use client::SOURCE_TOKEN_HEADER;
pub use retry::RetryPolicy;
