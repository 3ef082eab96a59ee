//! Repositories over the relational store.

pub mod access_token;
pub mod file;
pub mod note;
pub mod refresh_token;
pub mod user;

pub use access_token::AccessTokenRepository;
pub use file::FileRepository;
pub use note::NoteRepository;
pub use refresh_token::RefreshTokenRepository;
pub use user::UserRepository;
