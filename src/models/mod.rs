pub mod google;
pub mod invoice;
