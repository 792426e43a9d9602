//! Fixture loader using nom
//!
//! A seed file lists collections, each introduced by a header line and
//! followed by its indented rows:
//! ```text
//! # comment
//! departments[2]{id,name,description,created_time}:
//!   1,Engineering,Builds things,2024-01-15T09:00:00Z
//!   2,Sales,,2024-01-15T09:00:00Z
//! users[1]{id,name,email,age,department_id}:
//!   1,Alice,alice@example.com,30,1
//! ```
//! The bracketed count must match the number of rows. Fields may appear in
//! any order; an empty value means "not set". Values cannot contain commas.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated},
    IResult,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Department, Order, User};

/// Rows to load into a store, grouped by kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Seed {
    /// Department rows
    pub departments: Vec<Department>,
    /// User rows
    pub users: Vec<User>,
    /// Order rows
    pub orders: Vec<Order>,
}

const DEPARTMENT_FIELDS: &[&str] = &["id", "name", "description", "created_time"];
const USER_FIELDS: &[&str] = &["id", "name", "email", "age", "department_id"];
const ORDER_FIELDS: &[&str] = &["id", "order_no", "amount", "user_id", "order_time"];

#[derive(Debug, PartialEq)]
struct Header<'a> {
    collection: &'a str,
    count: usize,
    fields: Vec<&'a str>,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// `collection[count]{field,...}:`
fn header(input: &str) -> IResult<&str, Header<'_>> {
    let (input, collection) = identifier(input)?;
    let (input, count) = delimited(char('['), map_res(digit1, str::parse::<usize>), char(']'))(input)?;
    let (input, fields) = delimited(
        char('{'),
        separated_list1(char(','), delimited(space0, identifier, space0)),
        char('}'),
    )(input)?;
    let (input, _) = terminated(char(':'), space0)(input)?;

    Ok((
        input,
        Header {
            collection,
            count,
            fields,
        },
    ))
}

/// Comma-separated values, each trimmed
fn row(input: &str) -> IResult<&str, Vec<&str>> {
    let (input, values) = separated_list1(char(','), preceded(space0, take_while(|c: char| c != ',')))(input)?;
    Ok((input, values.into_iter().map(str::trim).collect()))
}

/// One row bound to its header's field names
struct Record<'a> {
    line: usize,
    fields: &'a [&'a str],
    values: Vec<&'a str>,
}

impl<'a> Record<'a> {
    fn raw(&self, name: &str) -> Option<&'a str> {
        self.fields
            .iter()
            .position(|field| *field == name)
            .map(|i| self.values[i])
            .filter(|value| !value.is_empty())
    }

    fn optional<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.raw(name)
            .map(|value| {
                value.parse::<T>().map_err(|err| {
                    Error::Parse(format!("line {}: bad {} {:?}: {}", self.line, name, value, err))
                })
            })
            .transpose()
    }

    fn required<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.optional(name)?
            .ok_or_else(|| Error::Parse(format!("line {}: missing {}", self.line, name)))
    }

    fn text(&self, name: &str) -> Result<String> {
        self.required::<String>(name)
    }

    fn department(&self) -> Result<Department> {
        let description = self.optional::<String>("description")?.unwrap_or_default();
        Ok(Department::new(self.text("name")?, description, self.required("created_time")?)
            .with_id(self.required("id")?))
    }

    fn user(&self) -> Result<User> {
        Ok(User::new(
            self.text("name")?,
            self.text("email")?,
            self.required("age")?,
            self.optional("department_id")?,
        )
        .with_id(self.required("id")?))
    }

    fn order(&self) -> Result<Order> {
        Ok(Order::new(
            self.text("order_no")?,
            self.required("amount")?,
            self.required("user_id")?,
            self.required("order_time")?,
        )
        .with_id(self.required("id")?))
    }
}

impl Seed {
    /// Parse a seed document
    pub fn parse(input: &str) -> Result<Self> {
        let mut seed = Seed::default();
        let mut lines = input
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .peekable();

        while let Some((line_no, line)) = lines.next() {
            if line.starts_with(char::is_whitespace) {
                return Err(Error::Parse(format!("line {}: row outside a collection", line_no)));
            }

            let (_, header) = all_consuming(header)(line.trim_end())
                .map_err(|err| Error::Parse(format!("line {}: malformed header: {:?}", line_no, err)))?;

            let known = match header.collection {
                "departments" => DEPARTMENT_FIELDS,
                "users" => USER_FIELDS,
                "orders" => ORDER_FIELDS,
                other => {
                    return Err(Error::Parse(format!(
                        "line {}: unknown collection {:?}",
                        line_no, other
                    )))
                }
            };
            if let Some(field) = header.fields.iter().find(|field| !known.contains(*field)) {
                return Err(Error::Parse(format!(
                    "line {}: unknown field {:?} in {}",
                    line_no, field, header.collection
                )));
            }

            let mut records = Vec::new();
            while let Some((_, next)) = lines.peek() {
                if !next.starts_with(char::is_whitespace) {
                    break;
                }
                let Some((row_no, text)) = lines.next() else {
                    break;
                };
                let (_, values) = all_consuming(row)(text.trim())?;
                if values.len() != header.fields.len() {
                    return Err(Error::Parse(format!(
                        "line {}: expected {} values, found {}",
                        row_no,
                        header.fields.len(),
                        values.len()
                    )));
                }
                records.push(Record {
                    line: row_no,
                    fields: &header.fields,
                    values,
                });
            }

            if records.len() != header.count {
                return Err(Error::Parse(format!(
                    "line {}: {} declares {} rows, found {}",
                    line_no,
                    header.collection,
                    header.count,
                    records.len()
                )));
            }

            for record in &records {
                match header.collection {
                    "departments" => seed.departments.push(record.department()?),
                    "users" => seed.users.push(record.user()?),
                    _ => seed.orders.push(record.order()?),
                }
            }
            debug!(collection = header.collection, rows = records.len(), "parsed seed collection");
        }

        Ok(seed)
    }

    /// Read and parse a seed file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Total number of rows across collections
    pub fn len(&self) -> usize {
        self.departments.len() + self.users.len() + self.orders.len()
    }

    /// True when there are no rows at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromStr for Seed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Seed::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::io::Write;

    const SAMPLE: &str = "\
# org fixture
departments[2]{id,name,description,created_time}:
  1,Engineering,Builds things,2024-01-15T09:00:00Z
  2,Sales,,2024-02-01T00:00:00Z

users[2]{id, name, email, age, department_id}:
  1,Alice,alice@example.com,30,1
  2,Bob,bob@example.com,25,
orders[1]{order_no,id,user_id,amount,order_time}:
  ORD-1,1,1,120.50,2024-03-01T10:00:00Z
";

    #[test]
    fn test_parse_header() {
        let (rest, parsed) = header("users[3]{id,name}: ").unwrap();
        assert_eq!(rest, "");
        assert_eq!(
            parsed,
            Header {
                collection: "users",
                count: 3,
                fields: vec!["id", "name"],
            }
        );
    }

    #[test]
    fn test_parse_row_keeps_empty_values() {
        let (_, values) = row("1, Bob ,,x").unwrap();
        assert_eq!(values, vec!["1", "Bob", "", "x"]);
    }

    #[test]
    fn test_parse_sample() {
        let seed = Seed::parse(SAMPLE).unwrap();
        assert_eq!(seed.len(), 5);

        assert_eq!(seed.departments[1].description, "");
        assert_eq!(
            seed.departments[0].created_time,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
        );
        assert_eq!(seed.users[0].department_id, Some(1));
        assert_eq!(seed.users[1].department_id, None);
        assert_eq!(seed.orders[0].amount, Decimal::new(12050, 2));
        assert_eq!(seed.orders[0].user_id, 1);
    }

    #[test]
    fn test_count_mismatch() {
        let text = "users[2]{id,name,email,age,department_id}:\n  1,A,a@e,1,\n";
        let err = Seed::parse(text).unwrap_err();
        assert!(matches!(err, Error::Parse(msg) if msg.contains("declares 2 rows")));
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(Seed::parse("teams[0]{id}:\n").is_err());
        assert!(Seed::parse("users[0]{id,nickname}:\n").is_err());
        assert!(Seed::parse("  1,2,3\n").is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let text = "users[1]{id,name,email,age}:\n  1,A,a@e,old\n";
        assert!(matches!(Seed::parse(text), Err(Error::Parse(msg)) if msg.contains("age")));

        let text = "users[1]{id,name,email,age}:\n  1,,a@e,3\n";
        assert!(matches!(Seed::parse(text), Err(Error::Parse(msg)) if msg.contains("missing name")));

        let text = "users[1]{id,name,email,age}:\n  1,A,a@e\n";
        assert!(Seed::parse(text).is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let seed = Seed::from_path(file.path()).unwrap();
        assert_eq!(seed.users.len(), 2);

        let missing = Seed::from_path(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
