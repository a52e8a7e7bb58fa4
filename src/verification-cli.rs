//! A CLI tool for checking published election results offline.
//! It reads the dump served by `GET /elections/<election_id>/dump` and
//! re-checks it with the same code the server uses to build it.

use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use evote_backend::model::{
    api::{DumpError, ResultsDump},
    common::Receipt,
};

const PROGRAM_NAME: &str = "verify-results";

const ABOUT_TEXT: &str = "Check the published results of an election.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const RESULTS_PATH: &str = "RESULTS_PATH";

const RESULTS_PATH_HELP: &str = "The path to a JSON results dump,\n\
as returned by `GET /elections/<election_id>/dump`";

const RECEIPT: &str = "receipt";

const RECEIPT_HELP: &str = "Also check that this receipt was counted";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(RESULTS_PATH)
                .help(RESULTS_PATH_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(RECEIPT)
                .long(RECEIPT)
                .short('r')
                .help(RECEIPT_HELP)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(Receipt)),
        )
}

/// Errors that this program may produce.
#[derive(Debug, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// The dump contradicts itself.
    Verification(DumpError),
    /// The receipt is not among the counted ones.
    MissingReceipt(Receipt),
}

/// Run verification, returning the checked dump.
fn verify(path: &str, receipt: Option<&Receipt>) -> Result<ResultsDump, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: ResultsDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    dump.verify().map_err(Error::Verification)?;
    if let Some(receipt) = receipt {
        if !dump.contains(receipt) {
            return Err(Error::MissingReceipt(receipt.clone()));
        }
    }

    Ok(dump)
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(RESULTS_PATH).unwrap(); // Required argument is guaranteed to be present.
    let receipt: Option<&Receipt> = args.get_one(RECEIPT);
    match verify(path, receipt) {
        Ok(dump) => {
            let snapshot = &dump.snapshot;
            println!("Verification succeeded.");
            println!(
                "{}: {} ballot{} from {} voter{}",
                snapshot.election.title,
                snapshot.total_ballots,
                plural(snapshot.total_ballots),
                snapshot.participation.total_voters,
                plural(snapshot.participation.total_voters),
            );
            for candidate in &snapshot.candidates {
                println!(
                    "{}: {} vote{} ({:.1}%)",
                    candidate.name,
                    candidate.vote_count,
                    plural(candidate.vote_count),
                    candidate.percentage
                );
            }
            match &snapshot.winner {
                Some(winner) => println!("Winner: {}", winner.name),
                None => println!("No winner: no ballots were cast."),
            }
            if let Some(receipt) = receipt {
                println!("Receipt {receipt} was counted.");
            }
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {}", msg);
            1
        }
        Err(Error::Verification(err)) => {
            println!("Verification failed: {}.", err);
            255
        }
        Err(Error::MissingReceipt(receipt)) => {
            println!("Verification failed: receipt {} was not counted.", receipt);
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use evote_backend::model::{
        api::{CandidateResult, ElectionSummary, Participation, TallySnapshot, TimelinePoint},
        common::ElectionStatus,
        mongodb::Id,
    };

    use super::*;

    fn receipt(n: u8) -> Receipt {
        format!("{n:02x}").repeat(32).parse().unwrap()
    }

    /// Two ballots for Alice out of two voters.
    fn dump() -> ResultsDump {
        let alice = CandidateResult {
            id: Id::new(),
            name: "Alice".to_string(),
            vote_count: 2,
            percentage: 100.0,
        };
        let bob = CandidateResult {
            id: Id::new(),
            name: "Bob".to_string(),
            vote_count: 0,
            percentage: 0.0,
        };
        let now = Utc::now();
        ResultsDump {
            snapshot: TallySnapshot {
                election: ElectionSummary {
                    id: Id::new(),
                    title: "Student Union President".to_string(),
                    start_time: now - Duration::days(2),
                    end_time: now - Duration::days(1),
                    status: ElectionStatus::Completed,
                },
                winner: Some(alice.clone()),
                candidates: vec![alice, bob],
                total_ballots: 2,
                participation: Participation {
                    voted: 2,
                    not_voted: 0,
                    total_voters: 2,
                    percentage: 100.0,
                },
                participation_by_faculty: vec![],
                participation_by_major: vec![],
                participation_by_cohort: vec![],
                timeline: vec![TimelinePoint {
                    date: (now - Duration::days(2)).date_naive(),
                    count: 2,
                }],
                computed_at: now,
            },
            receipts: vec![receipt(1), receipt(2)],
        }
    }

    /// Write the contents to a fresh file and return its path.
    fn write_temp(name: &str, contents: &str) -> String {
        let mut path = std::env::temp_dir();
        path.push(format!("{}-{}-{name}", PROGRAM_NAME, Id::new()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn write_dump(name: &str, dump: &ResultsDump) -> String {
        write_temp(name, &serde_json::to_string(dump).unwrap())
    }

    #[test]
    fn verification() {
        let path = write_dump("valid.json", &dump());
        let verified = verify(&path, None).unwrap();
        assert_eq!(verified.snapshot.total_ballots, 2);
        assert!(verify(&path, Some(&receipt(1))).is_ok());
        assert_eq!(
            verify(&path, Some(&receipt(7))),
            Err(Error::MissingReceipt(receipt(7)))
        );

        let mut tampered = dump();
        tampered.snapshot.candidates[1].vote_count = 1;
        let path = write_dump("tampered.json", &tampered);
        assert_eq!(
            verify(&path, None),
            Err(Error::Verification(DumpError::CandidateCounts {
                counted: 3,
                total: 2
            }))
        );

        let mut duplicated = dump();
        duplicated.receipts[1] = receipt(1);
        let path = write_dump("duplicated.json", &duplicated);
        assert_eq!(
            verify(&path, None),
            Err(Error::Verification(DumpError::DuplicateReceipt(receipt(1))))
        );

        let malformed = serde_json::to_string(&dump())
            .unwrap()
            .replace(receipt(2).as_str(), "not-a-receipt");
        let path = write_temp("malformed_receipt.json", &malformed);
        assert!(matches!(verify(&path, None), Err(Error::Format(_))));
    }

    #[test]
    fn correct_cli_usage() {
        let valid = write_dump("cli_valid.json", &dump());
        let command_line = [PROGRAM_NAME, valid.as_str()];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 0);

        let counted = receipt(2).to_string();
        let command_line = [PROGRAM_NAME, valid.as_str(), "--receipt", counted.as_str()];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 0);

        let missing = receipt(9).to_string();
        let command_line = [PROGRAM_NAME, valid.as_str(), "-r", missing.as_str()];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 255);

        let mut wrong_winner = dump();
        wrong_winner.snapshot.winner = Some(wrong_winner.snapshot.candidates[1].clone());
        let path = write_dump("cli_wrong_winner.json", &wrong_winner);
        let command_line = [PROGRAM_NAME, path.as_str()];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 255);

        let path = write_temp("cli_malformed.json", "{\"snapshot\": ");
        let command_line = [PROGRAM_NAME, path.as_str()];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 1);

        let command_line = [PROGRAM_NAME, "not a real file"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args), 1);
    }

    #[test]
    fn bad_cli_usage() {
        // Something very wrong.
        let command_line = [PROGRAM_NAME, "this", "invocation", "is", "incorrect"];
        cli().try_get_matches_from(command_line).unwrap_err();

        // No options at all.
        let command_line = [PROGRAM_NAME];
        cli().try_get_matches_from(command_line).unwrap_err();

        // A receipt that is not a receipt.
        let command_line = [PROGRAM_NAME, "results.json", "--receipt", "abc"];
        cli().try_get_matches_from(command_line).unwrap_err();
    }
}
