use std::cmp::Ordering;

use crate::api::{Book, BookId, BookListQuery, ReadingSession, ReadingSessionListQuery};

type BookPredicateBuilder = fn(&BookListQuery) -> Option<BookPredicate>;
type ReadingSessionPredicateBuilder =
    fn(&ReadingSessionListQuery) -> Option<ReadingSessionPredicate>;

/// Every builder looks at one query parameter and yields a predicate only when it is usable
const BOOK_PREDICATE_BUILDERS: [BookPredicateBuilder; 3] =
    [is_read_predicate, genre_predicate, search_predicate];

const READING_SESSION_PREDICATE_BUILDERS: [ReadingSessionPredicateBuilder; 1] =
    [book_predicate];

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BookPredicate {
    IsRead(bool),
    /// Case insensitive exact match
    Genre(String),
    /// Every term has to be contained in title or author, case insensitive
    Search(Vec<String>),
}

impl BookPredicate {
    pub fn matches(&self, book: &Book) -> bool {
        match self {
            BookPredicate::IsRead(is_read) => book.is_read == *is_read,
            BookPredicate::Genre(genre) => book.genre.to_lowercase() == genre.to_lowercase(),
            BookPredicate::Search(terms) => {
                let title = book.title.to_lowercase();
                let author = book.author.to_lowercase();
                terms.iter().all(|term| {
                    let term = term.to_lowercase();
                    title.contains(&term) || author.contains(&term)
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BookOrderingField {
    Title,
    CreatedAt,
}

impl BookOrderingField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "title" => Some(BookOrderingField::Title),
            "created_at" => Some(BookOrderingField::CreatedAt),
            _ => None,
        }
    }

    /// SQL ordering expression. Titles are compared bytewise, the same way `String` is.
    pub fn order_expression(&self) -> &'static str {
        match self {
            BookOrderingField::Title => "title COLLATE \"C\"",
            BookOrderingField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BookOrdering {
    pub field: BookOrderingField,
    pub descending: bool,
}

impl BookOrdering {
    fn compare(&self, a: &Book, b: &Book) -> Ordering {
        let ordering = match self.field {
            BookOrderingField::Title => a.title.cmp(&b.title),
            BookOrderingField::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct BookFilter {
    pub predicates: Vec<BookPredicate>,
    /// Applied in order, ties are always broken by ascending id
    pub ordering: Vec<BookOrdering>,
}

impl BookFilter {
    pub fn from_query(query: &BookListQuery) -> Self {
        Self {
            predicates: BOOK_PREDICATE_BUILDERS
                .iter()
                .filter_map(|builder| builder(query))
                .collect(),
            ordering: query
                .ordering
                .as_deref()
                .map(parse_ordering)
                .unwrap_or_default(),
        }
    }

    pub fn matches(&self, book: &Book) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(book))
    }

    pub fn compare(&self, a: &Book, b: &Book) -> Ordering {
        self.ordering
            .iter()
            .map(|ordering| ordering.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReadingSessionPredicate {
    Book(BookId),
}

impl ReadingSessionPredicate {
    pub fn matches(&self, session: &ReadingSession) -> bool {
        match self {
            ReadingSessionPredicate::Book(book_id) => session.book == *book_id,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReadingSessionFilter {
    pub predicates: Vec<ReadingSessionPredicate>,
}

impl ReadingSessionFilter {
    pub fn from_query(query: &ReadingSessionListQuery) -> Self {
        Self {
            predicates: READING_SESSION_PREDICATE_BUILDERS
                .iter()
                .filter_map(|builder| builder(query))
                .collect(),
        }
    }

    pub fn matches(&self, session: &ReadingSession) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(session))
    }
}

fn is_read_predicate(query: &BookListQuery) -> Option<BookPredicate> {
    match query.is_read.as_deref() {
        Some("true") => Some(BookPredicate::IsRead(true)),
        Some("false") => Some(BookPredicate::IsRead(false)),
        _ => None,
    }
}

fn genre_predicate(query: &BookListQuery) -> Option<BookPredicate> {
    query
        .genre
        .as_deref()
        .filter(|genre| !genre.is_empty())
        .map(|genre| BookPredicate::Genre(genre.to_string()))
}

fn search_predicate(query: &BookListQuery) -> Option<BookPredicate> {
    let terms: Vec<String> = query
        .search
        .as_deref()?
        .replace('\0', "")
        .replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(BookPredicate::Search(terms))
    }
}

fn book_predicate(query: &ReadingSessionListQuery) -> Option<ReadingSessionPredicate> {
    query
        .book
        .as_deref()?
        .trim()
        .parse()
        .ok()
        .map(ReadingSessionPredicate::Book)
}

/// Unknown fields are skipped, e.g. `-created_at,bogus,title`
fn parse_ordering(ordering: &str) -> Vec<BookOrdering> {
    ordering
        .split(',')
        .map(str::trim)
        .filter_map(|term| {
            let (descending, name) = match term.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, term),
            };
            BookOrderingField::parse(name).map(|field| BookOrdering { field, descending })
        })
        .collect()
}

#[cfg(test)]
mod filters_tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::api::{Book, BookListQuery, ReadingSessionListQuery};
    use crate::filters::{
        BookFilter, BookOrdering, BookOrderingField, BookPredicate, ReadingSessionFilter,
        ReadingSessionPredicate,
    };

    fn book(id: i32, title: &str, author: &str, genre: &str, is_read: bool) -> Book {
        let created_at =
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(id as i64);
        Book {
            id,
            user: 1,
            title: title.to_string(),
            author: author.to_string(),
            genre: genre.to_string(),
            description: "".to_string(),
            is_read,
            page_count: None,
            current_page: None,
            started_reading: None,
            finished_reading: None,
            language: "".to_string(),
            rating: None,
            cover_image: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_empty_query_builds_no_predicates() {
        let filter = BookFilter::from_query(&BookListQuery::default());
        assert_eq!(filter, BookFilter::default());
    }

    #[test]
    fn test_is_read_accepts_only_true_and_false() {
        let query = |value: &str| BookListQuery {
            is_read: Some(value.to_string()),
            ..BookListQuery::default()
        };
        assert_eq!(
            BookFilter::from_query(&query("true")).predicates,
            vec![BookPredicate::IsRead(true)]
        );
        assert_eq!(
            BookFilter::from_query(&query("false")).predicates,
            vec![BookPredicate::IsRead(false)]
        );
        assert!(BookFilter::from_query(&query("1")).predicates.is_empty());
        assert!(BookFilter::from_query(&query("True")).predicates.is_empty());
    }

    #[test]
    fn test_genre_matches_case_insensitively() {
        let filter = BookFilter::from_query(&BookListQuery {
            genre: Some("Fiction".to_string()),
            ..BookListQuery::default()
        });

        assert!(filter.matches(&book(1, "a", "b", "fiction", false)));
        assert!(filter.matches(&book(2, "a", "b", "FICTION", false)));
        assert!(
            !filter.matches(&book(3, "a", "b", "Science Fiction", false))
        );
        assert!(!filter.matches(&book(4, "a", "b", "", false)));
    }

    #[test]
    fn test_empty_genre_is_ignored() {
        let filter = BookFilter::from_query(&BookListQuery {
            genre: Some("".to_string()),
            ..BookListQuery::default()
        });
        assert!(filter.predicates.is_empty());
    }

    #[test]
    fn test_search_requires_every_term_in_title_or_author() {
        let filter = BookFilter::from_query(&BookListQuery {
            search: Some("dune, herbert".to_string()),
            ..BookListQuery::default()
        });
        assert_eq!(
            filter.predicates,
            vec![BookPredicate::Search(vec![
                "dune".to_string(),
                "herbert".to_string()
            ])]
        );

        assert!(filter.matches(&book(1, "Dune", "Frank Herbert", "", false)));
        assert!(!filter.matches(&book(2, "Dune", "Someone Else", "", false)));
        assert!(!filter.matches(&book(3, "Children of Dune", "", "", false)));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let filter = BookFilter::from_query(&BookListQuery {
            search: Some(" , ".to_string()),
            ..BookListQuery::default()
        });
        assert!(filter.predicates.is_empty());
    }

    #[test]
    fn test_predicates_are_combined() {
        let filter = BookFilter::from_query(&BookListQuery {
            is_read: Some("true".to_string()),
            genre: Some("fantasy".to_string()),
            ..BookListQuery::default()
        });

        assert!(filter.matches(&book(1, "a", "b", "Fantasy", true)));
        assert!(!filter.matches(&book(2, "a", "b", "Fantasy", false)));
        assert!(!filter.matches(&book(3, "a", "b", "Horror", true)));
    }

    #[test]
    fn test_ordering_skips_unknown_fields() {
        let filter = BookFilter::from_query(&BookListQuery {
            ordering: Some("-created_at,author, title".to_string()),
            ..BookListQuery::default()
        });
        assert_eq!(
            filter.ordering,
            vec![
                BookOrdering {
                    field: BookOrderingField::CreatedAt,
                    descending: true
                },
                BookOrdering {
                    field: BookOrderingField::Title,
                    descending: false
                }
            ]
        );
    }

    #[test]
    fn test_compare_falls_back_to_id() {
        let mut books = vec![
            book(3, "b", "", "", false),
            book(1, "b", "", "", false),
            book(2, "a", "", "", false),
        ];

        let by_title = BookFilter::from_query(&BookListQuery {
            ordering: Some("title".to_string()),
            ..BookListQuery::default()
        });
        books.sort_by(|a, b| by_title.compare(a, b));
        assert_eq!(
            books.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![2, 1, 3]
        );

        let newest_first = BookFilter::from_query(&BookListQuery {
            ordering: Some("-created_at".to_string()),
            ..BookListQuery::default()
        });
        books.sort_by(|a, b| newest_first.compare(a, b));
        assert_eq!(
            books.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );

        books.sort_by(|a, b| BookFilter::default().compare(a, b));
        assert_eq!(
            books.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_title_ordering_is_bytewise() {
        let mut books = vec![
            book(1, "anathem", "", "", false),
            book(2, "Solaris", "", "", false),
            book(3, "Dune", "", "", false),
        ];
        let by_title = BookFilter::from_query(&BookListQuery {
            ordering: Some("title".to_string()),
            ..BookListQuery::default()
        });
        books.sort_by(|a, b| by_title.compare(a, b));
        assert_eq!(
            books.iter().map(|b| b.id).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(
            BookOrderingField::Title.order_expression(),
            "title COLLATE \"C\""
        );
    }

    #[test]
    fn test_reading_session_book_filter() {
        let filter = ReadingSessionFilter::from_query(&ReadingSessionListQuery {
            book: Some("7".to_string()),
            ..ReadingSessionListQuery::default()
        });
        assert_eq!(filter.predicates, vec![ReadingSessionPredicate::Book(7)]);

        let ignored = ReadingSessionFilter::from_query(&ReadingSessionListQuery {
            book: Some("seven".to_string()),
            ..ReadingSessionListQuery::default()
        });
        assert!(ignored.predicates.is_empty());
    }
}
