//! Database entities.

pub mod access_token;
pub mod file;
pub mod note;
pub mod refresh_token;
pub mod user;

pub use access_token::Entity as AccessToken;
pub use file::Entity as File;
pub use note::Entity as Note;
pub use refresh_token::Entity as RefreshToken;
pub use user::Entity as User;
