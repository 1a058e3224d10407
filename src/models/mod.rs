pub mod appointment;
pub mod catalog;
pub mod client;
pub mod company;
pub mod draft;
pub mod message;

pub use appointment::{Appointment, AppointmentStatus};
pub use catalog::{Named, Professional, Service};
pub use client::Client;
pub use company::Company;
pub use draft::BookingDraft;
pub use message::{Message, Role};
