pub mod dvmn;
pub mod google;
pub mod prompt;
pub mod sheets;
pub mod telegram;
pub mod template;
