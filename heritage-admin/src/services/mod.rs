pub mod audit_service;
pub mod catalog_service;
pub mod export_service;
pub mod favorite_service;
pub mod flag_service;
pub mod image_service;
pub mod oauth_service;
pub mod password_service;
pub mod review_service;
pub mod site_service;
pub mod tag_service;
pub mod token_service;
pub mod user_service;
