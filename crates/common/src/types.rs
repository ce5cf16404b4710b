use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a reservation in the reservation service.
    ReservationId
);
uuid_id!(
    /// Identifier of a book in the catalog service.
    BookId
);
uuid_id!(
    /// Identifier of a library in the catalog service.
    LibraryId
);

/// Lifecycle status of a reservation.
///
/// ```text
/// Rented ──┬──► Returned
///          └──► Expired   (returned after the due date)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Rented,
    Returned,
    Expired,
}

impl ReservationStatus {
    /// Returns true while the book is still out with the reader.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Rented)
    }

    /// Status a rented reservation takes when returned on `return_date`.
    pub fn on_return(return_date: NaiveDate, till_date: NaiveDate) -> Self {
        if return_date > till_date {
            ReservationStatus::Expired
        } else {
            ReservationStatus::Returned
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Rented => "RENTED",
            ReservationStatus::Returned => "RETURNED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Physical condition of a book copy as tracked by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookCondition {
    Excellent,
    Good,
    Bad,
}

impl BookCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookCondition::Excellent => "EXCELLENT",
            BookCondition::Good => "GOOD",
            BookCondition::Bad => "BAD",
        }
    }
}

impl std::fmt::Display for BookCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reservation record as stored by the reservation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(rename = "reservationUid")]
    pub reservation_id: ReservationId,
    pub username: String,
    #[serde(rename = "bookUid")]
    pub book_id: BookId,
    #[serde(rename = "libraryUid")]
    pub library_id: LibraryId,
    pub status: ReservationStatus,
    pub start_date: NaiveDate,
    pub till_date: NaiveDate,
}

/// A book together with its availability in one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(rename = "bookUid")]
    pub book_id: BookId,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub genre: String,
    pub condition: BookCondition,
    pub available_count: i32,
}

impl Book {
    /// Strips the library-specific fields for embedding in a reservation.
    pub fn info(&self) -> BookInfo {
        BookInfo {
            book_id: self.book_id,
            name: self.name.clone(),
            author: self.author.clone(),
            genre: self.genre.clone(),
        }
    }
}

/// Book fields shown alongside a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    #[serde(rename = "bookUid")]
    pub book_id: BookId,
    pub name: String,
    pub author: String,
    pub genre: String,
}

impl BookInfo {
    /// Placeholder used when the catalog cannot describe a book.
    pub fn unknown(book_id: BookId) -> Self {
        Self {
            book_id,
            name: String::new(),
            author: String::new(),
            genre: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    #[serde(rename = "libraryUid")]
    pub library_id: LibraryId,
    pub name: String,
    pub address: String,
    pub city: String,
}

impl Library {
    /// Placeholder used when the catalog cannot describe a library.
    pub fn unknown(library_id: LibraryId) -> Self {
        Self {
            library_id,
            name: String::new(),
            address: String::new(),
            city: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRating {
    pub stars: i32,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub items: Vec<T>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 0,
            total_elements: 0,
            items: Vec::new(),
        }
    }
}

/// A reservation enriched with catalog data, as returned to gateway callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDetails {
    #[serde(rename = "reservationUid")]
    pub reservation_id: ReservationId,
    pub username: String,
    pub book: BookInfo,
    pub library: Library,
    pub status: ReservationStatus,
    pub start_date: NaiveDate,
    pub till_date: NaiveDate,
}

impl ReservationDetails {
    pub fn new(reservation: Reservation, book: BookInfo, library: Library) -> Self {
        Self {
            reservation_id: reservation.reservation_id,
            username: reservation.username,
            book,
            library,
            status: reservation.status,
            start_date: reservation.start_date,
            till_date: reservation.till_date,
        }
    }
}
