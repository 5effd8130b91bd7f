//! Text syntax for coordinates.
//!
//! A coordinate is written as a list of `key value` items separated by
//! `.` or whitespace, in any order:
//!
//! ```text
//! dev0.sm1.wp*.ln5 kernel3.grid*.cluster-.block(1,*,0).thread*
//! ```
//!
//! Scalar keys are `dev`, `sm`, `wp`, `ln` (32-bit) and `kernel`,
//! `grid` (64-bit); their value is a decimal number, `*` (wildcard) or
//! `?` (invalid). The 3-D keys `cluster`, `block` and `thread` take
//! `(x,y,z)` with the same per-component tokens, or `*`, `?`, or `-`
//! (not applicable) for the whole index. Omitted keys are wildcard.
//! This is the format produced by the `Display` implementation of
//! [`Coords`].

use std::collections::HashSet;
use std::str::FromStr;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char;
use nom::character::complete::space0;
use nom::character::complete::space1;
use nom::character::complete::u32 as number32;
use nom::character::complete::u64 as number64;
use nom::combinator::all_consuming;
use nom::combinator::map;
use nom::combinator::value;
use nom::multi::separated_list0;
use nom::sequence::delimited;
use nom::sequence::pair;
use nom::sequence::preceded;
use nom::sequence::tuple;

use crate::coords::Coords;
use crate::coords::Field;
use crate::coords::Idx3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid coordinates `{input}`: unexpected input at offset {offset}")]
    Syntax { input: String, offset: usize },

    #[error("field `{field}` given more than once")]
    Duplicate { field: &'static str },
}

#[derive(Debug, Clone, Copy)]
enum Item {
    Dev(Field<u32>),
    Sm(Field<u32>),
    Wp(Field<u32>),
    Ln(Field<u32>),
    Kernel(Field<u64>),
    Grid(Field<u64>),
    Cluster(Idx3),
    Block(Idx3),
    Thread(Idx3),
}

impl Item {
    fn key(&self) -> &'static str {
        match self {
            Item::Dev(_) => "dev",
            Item::Sm(_) => "sm",
            Item::Wp(_) => "wp",
            Item::Ln(_) => "ln",
            Item::Kernel(_) => "kernel",
            Item::Grid(_) => "grid",
            Item::Cluster(_) => "cluster",
            Item::Block(_) => "block",
            Item::Thread(_) => "thread",
        }
    }

    fn apply(self, coords: &mut Coords) {
        match self {
            Item::Dev(f) => coords.physical.dev = f,
            Item::Sm(f) => coords.physical.sm = f,
            Item::Wp(f) => coords.physical.wp = f,
            Item::Ln(f) => coords.physical.ln = f,
            Item::Kernel(f) => coords.logical.kernel_id = f,
            Item::Grid(f) => coords.logical.grid_id = f,
            Item::Cluster(idx) => coords.logical.cluster_idx = idx,
            Item::Block(idx) => coords.logical.block_idx = idx,
            Item::Thread(idx) => coords.logical.thread_idx = idx,
        }
    }
}

fn field<'a, T, P>(number: P) -> impl FnMut(&'a str) -> IResult<&'a str, Field<T>>
where
    T: Clone,
    P: FnMut(&'a str) -> IResult<&'a str, T>,
{
    alt((
        map(number, Field::Value),
        value(Field::Wildcard, char('*')),
        value(Field::Invalid, char('?')),
    ))
}

fn idx3(input: &str) -> IResult<&str, Idx3> {
    alt((
        map(
            delimited(
                char('('),
                tuple((
                    field(number32),
                    preceded(char(','), field(number32)),
                    preceded(char(','), field(number32)),
                )),
                char(')'),
            ),
            |(x, y, z)| Idx3::At(x, y, z),
        ),
        value(Idx3::WILDCARD, char('*')),
        value(Idx3::INVALID, char('?')),
        value(Idx3::Ignore, char('-')),
    ))(input)
}

fn keyed<'a, O, P>(key: &'static str, parser: P) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    P: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(pair(tag(key), space0), parser)
}

fn item(input: &str) -> IResult<&str, Item> {
    alt((
        map(keyed("dev", field(number32)), Item::Dev),
        map(keyed("sm", field(number32)), Item::Sm),
        map(keyed("wp", field(number32)), Item::Wp),
        map(keyed("ln", field(number32)), Item::Ln),
        map(keyed("kernel", field(number64)), Item::Kernel),
        map(keyed("grid", field(number64)), Item::Grid),
        map(keyed("cluster", idx3), Item::Cluster),
        map(keyed("block", idx3), Item::Block),
        map(keyed("thread", idx3), Item::Thread),
    ))(input)
}

fn separator(input: &str) -> IResult<&str, ()> {
    alt((
        value((), tuple((space0, char('.'), space0))),
        value((), space1),
    ))(input)
}

impl FromStr for Coords {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, items) = all_consuming(delimited(
            space0,
            separated_list0(separator, item),
            space0,
        ))(s)
        .map_err(|err| {
            let offset = match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => s.len() - e.input.len(),
                nom::Err::Incomplete(_) => s.len(),
            };
            ParseError::Syntax {
                input: s.to_string(),
                offset,
            }
        })?;

        let mut coords = Coords::wild();
        let mut seen = HashSet::new();
        for item in items {
            if !seen.insert(item.key()) {
                return Err(ParseError::Duplicate { field: item.key() });
            }
            item.apply(&mut coords);
        }
        Ok(coords)
    }
}
