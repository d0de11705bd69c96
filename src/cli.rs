use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use foodlog::lifecycle::Submission;
use foodlog::ops::{OpStatus, Operation};
use foodlog::parser::{self, Command};
use foodlog::repository::ListOutcome;
use foodlog::server::{
    AnalyzeAccepted, CreateRequest, ErrorBody, RecordRequest, SearchRequest, StatsRequest, StatsResponse,
    StatusRequest, OP_ANALYZE, OP_CREATE, OP_GET, OP_LIST, OP_SEARCH, OP_STATS, OP_STATUS, RESP_OK,
};
use foodlog::stats::AllergenCounting;
use foodlog::Record;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_ATTEMPTS: usize = 120;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive shell for a FoodLog node", long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    host: String,

    /// Signer address to start the session with.
    #[clap(long)]
    principal: Option<String>,
}

/// One TCP connection to the node plus the signer the user connected as.
struct Shell {
    host: String,
    stream: TcpStream,
    principal: Option<String>,
}

fn main() {
    let args = Args::parse();
    print_banner();

    let stream = match TcpStream::connect(&args.host) {
        Ok(s) => {
            println!("[\u{2713}] Connected to FoodLog at {}!", args.host);
            s
        }
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", args.host);
            println!("    Make sure to run 'cargo run --release --bin foodlog' in another terminal.");
            return;
        }
    };

    let mut shell = Shell { host: args.host, stream, principal: args.principal };
    match &shell.principal {
        Some(p) => println!("Signed in as {}.", p),
        None => println!("Not signed in. Use CONNECT '0x...' before adding or analyzing entries."),
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("foodlog> ");
        let _ = io::stdout().flush();
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = shell.execute(cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.to_uppercase().starts_with("ADD") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'ADD FOOD \"eggs\" SYMPTOMS \"hives\" AT \"breakfast\"'");
                } else if buffer.to_uppercase().starts_with("SEARCH") {
                    println!("    \u{2139}\u{fe0f}  Hint: Quote the term: SEARCH \"dairy\"");
                }
            }
        }
    }
    println!("Bye.");
}

fn print_banner() {
    println!("\n==================================================");
    println!("   FoodLog CLI - Private Food & Symptom Journal");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. CONNECT:    CONNECT '0xabc...'");
    println!("2. DISCONNECT: DISCONNECT");
    println!("3. ADD:        ADD FOOD \"eggs\" SYMPTOMS \"hives\" [AT \"breakfast\"]");
    println!("4. GET:        GET 'record-id'");
    println!("5. LIST:       LIST");
    println!("6. SEARCH:     SEARCH \"term\"");
    println!("7. ANALYZE:    ANALYZE 'record-id'");
    println!("8. STATUS:     STATUS 'operation-id'");
    println!("9. STATS:      STATS [ALL]");
    println!("10. EXIT:      Quit\n");
}

/// Client-side sealing of journal text before it leaves the machine.
fn seal(plain: &str) -> String {
    format!("FHE-{}", STANDARD.encode(plain.as_bytes()))
}

impl Shell {
    fn execute(&mut self, cmd: Command) -> Result<(), String> {
        match cmd {
            Command::Help => {
                print_help();
                Ok(())
            }
            Command::Connect { address } => {
                println!("[\u{2713}] Signed in as {}.", address);
                self.principal = Some(address);
                Ok(())
            }
            Command::Disconnect => {
                match self.principal.take() {
                    Some(p) => println!("[\u{2713}] Signed out {}.", p),
                    None => println!("Not signed in."),
                }
                Ok(())
            }
            Command::Add { food, symptoms, meal_time } => self.perform_add(food, symptoms, meal_time),
            Command::Get { id } => self.perform_get(id),
            Command::List => self.perform_list(),
            Command::Search { query } => self.perform_search(query),
            Command::Analyze { id } => self.perform_analyze(id),
            Command::Status { op } => self.perform_status(op),
            Command::Stats { every_occurrence } => self.perform_stats(every_occurrence),
            Command::Exit => Ok(()),
        }
    }

    // --- NETWORK HANDLERS ---

    fn perform_add(&mut self, food: String, symptoms: String, meal_time: Option<String>) -> Result<(), String> {
        let req = CreateRequest {
            principal: self.principal.clone(),
            submission: Submission { food: seal(&food), symptoms: seal(&symptoms), meal_time_hint: meal_time },
        };
        let record: Record = self.request(OP_CREATE, &req)?;
        println!("[\u{2713} OK] Entry added: {} (status: {})", record.id, record.status);
        Ok(())
    }

    fn perform_get(&mut self, id: String) -> Result<(), String> {
        let req = RecordRequest { principal: self.principal.clone(), id };
        let record: Record = self.request(OP_GET, &req)?;
        print_record(&record, self.principal.as_deref());
        println!("    food:     {}", record.encrypted_food);
        println!("    symptoms: {}", record.encrypted_symptoms);
        Ok(())
    }

    fn perform_list(&mut self) -> Result<(), String> {
        let outcome: ListOutcome = self.request(OP_LIST, &())?;
        self.print_outcome(&outcome, "No entries yet. Add one with ADD FOOD ... SYMPTOMS ...");
        Ok(())
    }

    fn perform_search(&mut self, query: String) -> Result<(), String> {
        let outcome: ListOutcome = self.request(OP_SEARCH, &SearchRequest { query: query.clone() })?;
        self.print_outcome(&outcome, &format!("No entries match \"{}\".", query));
        Ok(())
    }

    fn perform_analyze(&mut self, id: String) -> Result<(), String> {
        let req = RecordRequest { principal: self.principal.clone(), id };
        let accepted: AnalyzeAccepted = self.request(OP_ANALYZE, &req)?;
        println!("Analysis started (operation {}).", accepted.op);

        for _ in 0..POLL_ATTEMPTS {
            let op: Operation = self.request(OP_STATUS, &StatusRequest { op: accepted.op })?;
            if op.status != OpStatus::Pending {
                print_operation(&op);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        println!("Still running. Check later with STATUS '{}'.", accepted.op);
        Ok(())
    }

    fn perform_status(&mut self, op: Uuid) -> Result<(), String> {
        let op: Operation = self.request(OP_STATUS, &StatusRequest { op })?;
        print_operation(&op);
        Ok(())
    }

    fn perform_stats(&mut self, every_occurrence: bool) -> Result<(), String> {
        let counting = if every_occurrence { AllergenCounting::EveryOccurrence } else { AllergenCounting::DistinctPerRecord };
        let stats: StatsResponse = self.request(OP_STATS, &StatsRequest { counting })?;
        let counts = &stats.summary.counts;

        println!("\nEntries: {} total", counts.total());
        println!("  pending:  {}", counts.pending);
        println!("  analyzed: {}", counts.analyzed);
        println!("  flagged:  {}", counts.flagged);
        if stats.summary.allergens.is_empty() {
            println!("No allergens detected yet.");
        } else {
            println!("Allergens:");
            for (name, n) in &stats.summary.allergens {
                println!("  • {:<12} {}", name, n);
            }
        }
        if stats.skipped > 0 {
            println!("[\u{26a0}\u{fe0f}] {} entries could not be read and are not counted.", stats.skipped);
        }
        println!();
        Ok(())
    }

    fn print_outcome(&self, outcome: &ListOutcome, empty_message: &str) {
        if outcome.index_corrupt {
            println!("[\u{26a0}\u{fe0f}] The record index is unreadable; showing nothing.");
        }
        if outcome.records.is_empty() && !outcome.index_corrupt {
            println!("{}", empty_message);
        }
        for record in &outcome.records {
            print_record(record, self.principal.as_deref());
        }
        if !outcome.skipped.is_empty() {
            println!("[\u{26a0}\u{fe0f}] {} entries could not be read:", outcome.skipped.len());
            for skipped in &outcome.skipped {
                println!("    {}: {}", skipped.id, skipped.reason);
            }
        }
    }

    /// Sends one frame and reads the reply. A frame that could not be written
    /// is resent once on a fresh connection, which also re-runs the node's
    /// availability probe. Once the frame is out, a lost reply is reported
    /// and the request is not repeated: the node may already have run it.
    fn request<Req: Serialize, Resp: DeserializeOwned>(&mut self, op: u8, req: &Req) -> Result<Resp, String> {
        let body = serde_json::to_vec(req).map_err(|e| e.to_string())?;
        if self.send_frame(op, &body).is_err() {
            self.reconnect()?;
            self.send_frame(op, &body).map_err(|e| e.to_string())?;
        }

        let (ok, payload) = match self.read_reply() {
            Ok(reply) => reply,
            Err(e) => {
                let _ = self.reconnect();
                return Err(format!("connection lost before the reply ({}); check with LIST before retrying", e));
            }
        };

        if ok {
            serde_json::from_slice(&payload).map_err(|e| format!("unreadable response: {}", e))
        } else {
            let err: ErrorBody = serde_json::from_slice(&payload).map_err(|e| format!("unreadable error: {}", e))?;
            Err(format!("{} (step: {}{})", err.message, err.step, if err.retryable { ", retry later" } else { "" }))
        }
    }

    fn reconnect(&mut self) -> Result<(), String> {
        self.stream = TcpStream::connect(&self.host)
            .map_err(|e| format!("server at {} unreachable: {}", self.host, e))?;
        Ok(())
    }

    fn send_frame(&mut self, op: u8, body: &[u8]) -> io::Result<()> {
        self.stream.write_all(&[op])?;
        self.stream.write_all(&(body.len() as u32).to_le_bytes())?;
        self.stream.write_all(body)?;
        self.stream.flush()
    }

    fn read_reply(&mut self) -> io::Result<(bool, Vec<u8>)> {
        let mut status = [0u8; 1];
        self.stream.read_exact(&mut status)?;
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        self.stream.read_exact(&mut payload)?;
        Ok((status[0] == RESP_OK, payload))
    }
}

fn print_record(record: &Record, principal: Option<&str>) {
    let mine = principal.map_or(false, |p| record.is_owned_by(p));
    let allergens = if record.potential_allergens.is_empty() {
        "-".to_string()
    } else {
        record.potential_allergens.join(", ")
    };
    println!(
        "{} {} | {:<8} | t={} | owner {} | allergens: {}",
        if mine { "*" } else { " " },
        record.id,
        record.status.as_str(),
        record.timestamp,
        record.owner,
        allergens
    );
}

fn print_operation(op: &Operation) {
    match op.status {
        OpStatus::Pending => println!("[\u{23f3}] {}", op.message),
        OpStatus::Success => println!("[\u{2713}] {}", op.message),
        OpStatus::Error => println!("[\u{2717}] {}", op.message),
    }
}
