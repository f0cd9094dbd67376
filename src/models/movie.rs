//! Movie catalog models: records, input payloads, list filters and paging

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::validator::{permitted_value, unique, Validator};

/// Error text for a malformed runtime value
pub const INVALID_RUNTIME_FORMAT: &str = "invalid format for 'runtime' property";

/// Running time in minutes
///
/// Travels over JSON as the string `"<n> mins"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

impl Runtime {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuntimeVisitor;

        impl<'de> Visitor<'de> for RuntimeVisitor {
            type Value = Runtime;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string of the form \"<n> mins\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Runtime, E> {
                parse_runtime(value).ok_or_else(|| E::custom(INVALID_RUNTIME_FORMAT))
            }

            // Bare numbers get the same message as a malformed string
            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Runtime, E> {
                Err(E::custom(INVALID_RUNTIME_FORMAT))
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Runtime, E> {
                Err(E::custom(INVALID_RUNTIME_FORMAT))
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Runtime, E> {
                Err(E::custom(INVALID_RUNTIME_FORMAT))
            }
        }

        deserializer.deserialize_any(RuntimeVisitor)
    }
}

fn parse_runtime(value: &str) -> Option<Runtime> {
    let parts: Vec<&str> = value.split(' ').collect();
    if parts.len() != 2 || parts[1] != "mins" {
        return None;
    }
    parts[0].parse::<i32>().ok().map(Runtime)
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    pub id: i64,

    #[serde(skip)]
    pub created_at: DateTime<Utc>,

    pub title: String,

    #[serde(skip_serializing_if = "is_zero_year")]
    pub year: i32,

    #[serde(skip_serializing_if = "Runtime::is_zero")]
    pub runtime: Runtime,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,

    pub version: i32,
}

fn is_zero_year(year: &i32) -> bool {
    *year == 0
}

impl Movie {
    /// Unsaved movie built from a create payload
    pub fn from_input(input: MovieInput) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            title: input.title,
            year: input.year,
            runtime: input.runtime,
            genres: input.genres,
            version: 1,
        }
    }
}

pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(
        movie.title.len() <= 500,
        "title",
        "must not be more than 500 bytes long",
    );

    v.check(movie.year != 0, "year", "must be provided");
    v.check(
        movie.year >= 1888 && movie.year <= Utc::now().year(),
        "year",
        "must be greater than 1888 and not be in the future",
    );

    v.check(!movie.runtime.is_zero(), "runtime", "must be provided");
    v.check(movie.runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(
        !movie.genres.is_empty(),
        "genres",
        "must contain at least 1 genre",
    );
    v.check(
        movie.genres.len() <= 5,
        "genres",
        "must not contain more than 5 genres",
    );
    v.check(
        unique(&movie.genres),
        "genres",
        "must not contain duplicate values",
    );
}

/// Create payload for `POST /v1/movies`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MovieInput {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

/// Partial update payload for `PATCH /v1/movies/:id`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoviePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
}

impl MoviePatch {
    /// Overwrite only the fields present in the patch
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

/// Columns a listing may be sorted by, with optional `-` for descending
pub const SORT_SAFELIST: [&str; 8] = [
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// Listing query for `GET /v1/movies`
#[derive(Debug, Clone, PartialEq)]
pub struct MovieFilters {
    pub title: String,
    pub genres: Vec<String>,
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
}

impl Default for MovieFilters {
    fn default() -> Self {
        Self {
            title: String::new(),
            genres: Vec::new(),
            page: 1,
            page_size: 20,
            sort: "id".to_string(),
        }
    }
}

impl MovieFilters {
    /// Read filters from the query string
    ///
    /// Unparseable integers are recorded on `v` and the default is kept.
    pub fn from_query(query: &HashMap<String, String>, v: &mut Validator) -> Self {
        let defaults = Self::default();

        let non_empty = |key: &str| query.get(key).filter(|s| !s.is_empty());

        let read_int = |key: &str, default: i64, v: &mut Validator| match non_empty(key) {
            None => default,
            Some(raw) => raw.parse::<i64>().unwrap_or_else(|_| {
                v.add_error(key, "must be an integer");
                default
            }),
        };

        let filters = Self {
            title: non_empty("title").cloned().unwrap_or_default(),
            genres: non_empty("genres")
                .map(|csv| csv.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            page: read_int("page", defaults.page, v),
            page_size: read_int("page_size", defaults.page_size, v),
            sort: non_empty("sort").cloned().unwrap_or(defaults.sort),
        };

        filters.validate(v);
        filters
    }

    pub fn validate(&self, v: &mut Validator) {
        v.check(self.page > 0, "page", "must be greater than zero");
        v.check(
            self.page <= 10_000_000,
            "page",
            "must be a maximum of 10 million",
        );
        v.check(self.page_size > 0, "page_size", "must be greater than zero");
        v.check(
            self.page_size <= 100,
            "page_size",
            "must be a maximum of 100",
        );
        v.check(
            permitted_value(&self.sort.as_str(), &SORT_SAFELIST),
            "sort",
            "invalid sort value",
        );
    }

    /// Column to sort by
    ///
    /// Only ever returns a safelisted column name, so the result can be
    /// interpolated into SQL.
    pub fn sort_column(&self) -> &'static str {
        match self.sort.trim_start_matches('-') {
            "title" => "title",
            "year" => "year",
            "runtime" => "runtime",
            _ => "id",
        }
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort.starts_with('-') {
            "DESC"
        } else {
            "ASC"
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// Pagination metadata returned with a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub total_records: i64,
}

fn is_zero_i64(n: &i64) -> bool {
    *n == 0
}

impl Metadata {
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 || page_size <= 0 {
            return Self::default();
        }

        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_movie() -> Movie {
        Movie::from_input(MovieInput {
            title: "Moana".to_string(),
            year: 2016,
            runtime: Runtime(107),
            genres: vec!["animation".to_string(), "adventure".to_string()],
        })
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // Test 1: Runtime serializes as "<n> mins"
    #[test]
    fn test_runtime_serialize() {
        assert_eq!(serde_json::to_string(&Runtime(102)).unwrap(), "\"102 mins\"");
    }

    // Test 2: Runtime accepts only the exact shape
    #[test]
    fn test_runtime_deserialize() {
        let ok: Runtime = serde_json::from_str("\"95 mins\"").unwrap();
        assert_eq!(ok, Runtime(95));

        for bad in ["\"95\"", "\"95 minutes\"", "\"ninety mins\"", "95", "\" 95 mins\""] {
            let err = serde_json::from_str::<Runtime>(bad).unwrap_err();
            assert!(
                err.to_string().contains(INVALID_RUNTIME_FORMAT),
                "input {} gave {}",
                bad,
                err
            );
        }
    }

    // Test 3: Movie JSON omits created_at and empty optional fields
    #[test]
    fn test_movie_serialization() {
        let json = serde_json::to_value(valid_movie()).unwrap();
        assert_eq!(json["title"], "Moana");
        assert_eq!(json["runtime"], "107 mins");
        assert_eq!(json["version"], 1);
        assert!(json.get("created_at").is_none());

        let mut empty = valid_movie();
        empty.year = 0;
        empty.runtime = Runtime(0);
        empty.genres.clear();
        let json = serde_json::to_value(empty).unwrap();
        assert!(json.get("year").is_none());
        assert!(json.get("runtime").is_none());
        assert!(json.get("genres").is_none());
    }

    // Test 4: Valid movie passes validation
    #[test]
    fn test_validate_movie_ok() {
        let mut v = Validator::new();
        validate_movie(&mut v, &valid_movie());
        assert!(v.valid(), "{:?}", v.errors());
    }

    // Test 5: Validation failures per field
    #[test]
    fn test_validate_movie_failures() {
        let mut movie = valid_movie();
        movie.title = String::new();
        movie.year = Utc::now().year() + 1;
        movie.runtime = Runtime(-5);
        movie.genres = vec!["drama".to_string(), "drama".to_string()];

        let mut v = Validator::new();
        validate_movie(&mut v, &movie);
        let errors = v.errors();

        assert_eq!(errors["title"], "must be provided");
        assert_eq!(
            errors["year"],
            "must be greater than 1888 and not be in the future"
        );
        assert_eq!(errors["runtime"], "must be a positive integer");
        assert_eq!(errors["genres"], "must not contain duplicate values");
    }

    // Test 6: Unknown fields in the create payload are rejected
    #[test]
    fn test_movie_input_rejects_unknown_fields() {
        let result = serde_json::from_str::<MovieInput>(r#"{"title":"x","rating":5}"#);
        assert!(result.unwrap_err().to_string().contains("unknown field"));
    }

    // Test 7: Patch overwrites only provided fields
    #[test]
    fn test_patch_apply() {
        let mut movie = valid_movie();
        let patch: MoviePatch = serde_json::from_str(r#"{"year": 2017}"#).unwrap();
        patch.apply(&mut movie);

        assert_eq!(movie.year, 2017);
        assert_eq!(movie.title, "Moana");
        assert_eq!(movie.runtime, Runtime(107));
    }

    // Test 8: Filters from the query string with defaults
    #[test]
    fn test_filters_from_query() {
        let mut v = Validator::new();
        let filters = MovieFilters::from_query(
            &query(&[("title", "moana"), ("genres", "animation,adventure"), ("sort", "-year")]),
            &mut v,
        );

        assert!(v.valid());
        assert_eq!(filters.title, "moana");
        assert_eq!(filters.genres, vec!["animation", "adventure"]);
        assert_eq!(filters.page, 1);
        assert_eq!(filters.page_size, 20);
        assert_eq!(filters.sort_column(), "year");
        assert_eq!(filters.sort_direction(), "DESC");
    }

    // Test 9: Bad paging and sort values are reported
    #[test]
    fn test_filters_validation() {
        let mut v = Validator::new();
        MovieFilters::from_query(
            &query(&[("page", "abc"), ("page_size", "500"), ("sort", "rating")]),
            &mut v,
        );

        assert_eq!(v.errors()["page"], "must be an integer");
        assert_eq!(v.errors()["page_size"], "must be a maximum of 100");
        assert_eq!(v.errors()["sort"], "invalid sort value");
    }

    // Test 10: Limit and offset
    #[test]
    fn test_limit_offset() {
        let filters = MovieFilters {
            page: 3,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(filters.limit(), 10);
        assert_eq!(filters.offset(), 20);
    }

    // Test 11: Metadata calculation
    #[test]
    fn test_metadata() {
        assert_eq!(Metadata::calculate(0, 1, 20), Metadata::default());

        let metadata = Metadata::calculate(45, 2, 20);
        assert_eq!(metadata.current_page, 2);
        assert_eq!(metadata.first_page, 1);
        assert_eq!(metadata.last_page, 3);
        assert_eq!(metadata.total_records, 45);

        let json = serde_json::to_value(Metadata::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
