pub mod api;
pub mod cache;
pub mod card_brand;
pub mod checkout;
pub mod import;
pub mod inventory;
pub mod logs;
pub mod matcher;
pub mod orders;
pub mod payment;
pub mod plugin;
pub mod refresh;
pub mod report;
pub mod settings;
