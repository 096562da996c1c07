pub mod conversations;
pub mod messages;

pub use conversations::Entity as Conversations;
pub use messages::Entity as Messages;
