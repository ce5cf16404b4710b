//! Shared identifiers and data transfer types for the library reservation gateway.

pub mod types;

pub use types::{
    Book, BookCondition, BookId, BookInfo, Library, LibraryId, Page, Reservation,
    ReservationDetails, ReservationId, ReservationStatus, UserRating,
};
