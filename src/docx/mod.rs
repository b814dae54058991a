pub mod body;
pub mod comments;
pub mod locate;
pub mod package;
pub mod threads;
pub mod xml;
