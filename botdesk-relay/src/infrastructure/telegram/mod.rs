pub mod bot_api;
pub mod poller;
pub mod updates;

pub use bot_api::{TelegramBotApi, build_file_url};
pub use poller::{UpdateFeed, UpdatePoller};
pub use updates::parse_update;
