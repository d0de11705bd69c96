use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use uuid::Uuid;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Connect { address: String },
    Disconnect,
    Add { food: String, symptoms: String, meal_time: Option<String> },
    Get { id: String },
    List,
    Search { query: String },
    Analyze { id: String },
    Status { op: Uuid },
    Stats { every_occurrence: bool },
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

/// Record ids and addresses: `[A-Za-z0-9_-]+`, optionally in single quotes.
fn parse_token(input: &str) -> IResult<&str, String> {
    map(
        alt((delimited(char('\''), bare_token, char('\'')), bare_token)),
        |s: &str| s.to_string(),
    )(input)
}

fn bare_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')(input)
}

fn parse_uuid(input: &str) -> IResult<&str, Uuid> {
    let (rest, token) = parse_token(input)?;
    match Uuid::parse_str(&token) {
        Ok(uuid) => Ok((rest, uuid)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_connect(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("CONNECT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, address) = parse_token(input)?;
    Ok((input, Command::Connect { address }))
}

fn parse_disconnect(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("DISCONNECT")(input)?;
    Ok((input, Command::Disconnect))
}

fn parse_add(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ADD")(input)?;
    let (input, _) = ws(tag_ci("FOOD"))(input)?;
    let (input, food) = parse_quoted_string(input)?;
    let (input, _) = ws(tag_ci("SYMPTOMS"))(input)?;
    let (input, symptoms) = parse_quoted_string(input)?;
    let (input, meal_time) = opt(preceded(ws(tag_ci("AT")), parse_quoted_string))(input)?;
    Ok((input, Command::Add { food, symptoms, meal_time }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_token(input)?;
    Ok((input, Command::Get { id }))
}

fn parse_list(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("LIST"), tag_ci("LS")))(input)?;
    Ok((input, Command::List))
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, query) = parse_quoted_string(input)?;
    Ok((input, Command::Search { query }))
}

fn parse_analyze(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ANALYZE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_token(input)?;
    Ok((input, Command::Analyze { id }))
}

fn parse_status(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("STATUS")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, op) = parse_uuid(input)?;
    Ok((input, Command::Status { op }))
}

fn parse_stats(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("STATS")(input)?;
    let (input, all) = opt(tuple((multispace1, tag_ci("ALL"))))(input)?;
    Ok((input, Command::Stats { every_occurrence: all.is_some() }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_disconnect,
        parse_connect,
        parse_add,
        parse_get,
        parse_list,
        parse_search,
        parse_analyze,
        parse_status,
        parse_stats,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.len() > 20 {
                format!("{}...", &e.input[..e.input.char_indices().nth(20).map(|(i, _)| i).unwrap_or(e.input.len())])
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
