//! Catalog service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{Book, BookCondition, BookId, Library, LibraryId, Page};

use super::{Dependency, OperationKey};
use crate::error::SagaError;

/// Books, libraries and per-library availability.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Fetches a book with its current availability.
    async fn get_book(&self, book_id: BookId) -> Result<Book, SagaError>;

    async fn get_library(&self, library_id: LibraryId) -> Result<Library, SagaError>;

    /// Lists libraries in a city. Degrades to an empty page when the catalog
    /// breaker is open.
    async fn list_libraries(
        &self,
        city: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Library>, SagaError>;

    /// Lists a library's books; without `show_all` only available ones.
    async fn list_library_books(
        &self,
        library_id: LibraryId,
        page: u32,
        size: u32,
        show_all: bool,
    ) -> Result<Page<Book>, SagaError>;

    /// Changes a book's available count in one library by `delta`.
    ///
    /// Applied at most once per `key`; repeating a key is a successful no-op.
    async fn adjust_book_count(
        &self,
        library_id: LibraryId,
        book_id: BookId,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError>;

    async fn set_book_condition(
        &self,
        book_id: BookId,
        condition: BookCondition,
    ) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    libraries: HashMap<LibraryId, Library>,
    books: HashMap<BookId, (LibraryId, Book)>,
    applied: HashSet<String>,
    unavailable: bool,
    count_updates_unavailable: usize,
    condition_updates_unavailable: bool,
    count_updates: usize,
    condition_updates: usize,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogService {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalogService {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_library(&self, library: Library) {
        self.write().libraries.insert(library.library_id, library);
    }

    /// Stocks `book` in `library_id` with the book's own available count.
    pub fn add_book(&self, library_id: LibraryId, book: Book) {
        self.write().books.insert(book.book_id, (library_id, book));
    }

    /// Makes every call fail as if the catalog were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Makes the next `times` count updates fail as unavailable.
    pub fn fail_next_count_updates(&self, times: usize) {
        self.write().count_updates_unavailable = times;
    }

    /// Makes condition updates fail as unavailable.
    pub fn set_condition_updates_unavailable(&self, unavailable: bool) {
        self.write().condition_updates_unavailable = unavailable;
    }

    /// Returns the available count of a book, if stocked.
    pub fn available_count(&self, book_id: BookId) -> Option<i32> {
        self.read()
            .books
            .get(&book_id)
            .map(|(_, book)| book.available_count)
    }

    pub fn condition(&self, book_id: BookId) -> Option<BookCondition> {
        self.read().books.get(&book_id).map(|(_, book)| book.condition)
    }

    /// Number of count updates actually applied.
    pub fn count_updates(&self) -> usize {
        self.read().count_updates
    }

    /// Number of condition updates actually applied.
    pub fn condition_updates(&self) -> usize {
        self.read().condition_updates
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryCatalogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryCatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(state: &InMemoryCatalogState) -> Result<(), SagaError> {
        if state.unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Catalog));
        }
        Ok(())
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: u32, size: u32) -> Page<T> {
    let total = items.len() as u64;
    let page = page.max(1);
    let size = if size == 0 {
        u32::try_from(items.len().max(1)).unwrap_or(u32::MAX)
    } else {
        size
    };
    let offset = u64::from(page - 1).saturating_mul(u64::from(size));
    let items = items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(size as usize)
        .collect();
    Page {
        page,
        page_size: size,
        total_elements: total,
        items,
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalogService {
    async fn get_book(&self, book_id: BookId) -> Result<Book, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        state
            .books
            .get(&book_id)
            .map(|(_, book)| book.clone())
            .ok_or_else(|| SagaError::not_found("book", book_id))
    }

    async fn get_library(&self, library_id: LibraryId) -> Result<Library, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        state
            .libraries
            .get(&library_id)
            .cloned()
            .ok_or_else(|| SagaError::not_found("library", library_id))
    }

    async fn list_libraries(
        &self,
        city: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Library>, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        let mut libraries: Vec<Library> = state
            .libraries
            .values()
            .filter(|library| library.city == city)
            .cloned()
            .collect();
        libraries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(libraries, page, size))
    }

    async fn list_library_books(
        &self,
        library_id: LibraryId,
        page: u32,
        size: u32,
        show_all: bool,
    ) -> Result<Page<Book>, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|(lib, book)| *lib == library_id && (show_all || book.available_count > 0))
            .map(|(_, book)| book.clone())
            .collect();
        books.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(books, page, size))
    }

    async fn adjust_book_count(
        &self,
        library_id: LibraryId,
        book_id: BookId,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError> {
        let mut state = self.write();
        Self::check_available(&state)?;
        if state.count_updates_unavailable > 0 {
            state.count_updates_unavailable -= 1;
            return Err(SagaError::ServiceUnavailable(Dependency::Catalog));
        }
        if state.applied.contains(key.as_str()) {
            return Ok(());
        }

        let (stocked_in, book) = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| SagaError::not_found("book", book_id))?;
        if *stocked_in != library_id {
            return Err(SagaError::not_found("library book", format!("{library_id}/{book_id}")));
        }
        let new_count = book.available_count + delta;
        if new_count < 0 {
            return Err(SagaError::Downstream {
                dependency: Dependency::Catalog,
                status: 400,
                message: "count of books is zero".to_string(),
            });
        }
        book.available_count = new_count;

        state.applied.insert(key.as_str().to_string());
        state.count_updates += 1;
        Ok(())
    }

    async fn set_book_condition(
        &self,
        book_id: BookId,
        condition: BookCondition,
    ) -> Result<(), SagaError> {
        let mut state = self.write();
        Self::check_available(&state)?;
        if state.condition_updates_unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Catalog));
        }
        let (_, book) = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| SagaError::not_found("book", book_id))?;
        book.condition = condition;
        state.condition_updates += 1;
        Ok(())
    }
}
