use std::env;
use std::path::PathBuf;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};

use glimmer::{DEFAULT_PAGE_SIZE, HistoryLoader, MAX_HISTORY_PAGES, Paginator};
use glimmer_provider::{ProviderConfig, Responder, ResponseProvider, TurnEvent, TurnRequest};
use glimmer_store::{
    ChatStore, ChatroomId, MessageId, NewMessage, Sender, StateFile, StoreError,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    state_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    StoreCrud,
    StreamingLifecycle,
    FallbackCascade,
    Pagination,
    SnapshotRoundtrip,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "store_crud" => Some(Self::StoreCrud),
            "streaming_lifecycle" => Some(Self::StreamingLifecycle),
            "fallback_cascade" => Some(Self::FallbackCascade),
            "pagination" => Some(Self::Pagination),
            "snapshot_roundtrip" => Some(Self::SnapshotRoundtrip),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::StoreCrud => "store_crud",
            Self::StreamingLifecycle => "streaming_lifecycle",
            Self::FallbackCascade => "fallback_cascade",
            Self::Pagination => "pagination",
            Self::SnapshotRoundtrip => "snapshot_roundtrip",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("store validation failed: {source}"))]
    StoreValidation {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());
    if let Some(state_path) = args.state_path.as_deref() {
        println!("state_path={state_path}");
    }

    match args.scenario {
        Scenario::StoreCrud => run_store_crud(),
        Scenario::StreamingLifecycle => run_streaming_lifecycle(),
        Scenario::FallbackCascade => run_fallback_cascade().await,
        Scenario::Pagination => run_pagination().await,
        Scenario::SnapshotRoundtrip => run_snapshot_roundtrip(args.state_path.as_deref()),
        Scenario::All => run_all(args.state_path.as_deref()).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut state_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--state" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-state-value",
                    arg: "--state",
                })?;
                state_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        state_path,
    })
}

async fn run_all(state_path: Option<&str>) -> RunnerResult<()> {
    run_store_crud()?;
    run_streaming_lifecycle()?;
    run_fallback_cascade().await?;
    run_pagination().await?;
    run_snapshot_roundtrip(state_path)?;

    println!("all_passed=true");
    Ok(())
}

fn run_store_crud() -> RunnerResult<()> {
    let mut store = ChatStore::new();
    let first = store.create_chatroom("First Room", None);
    let second = store.create_chatroom("Second Room", None);

    let listing_order_ok =
        store.chatrooms()[0].id == second && store.chatrooms()[1].id == first;

    store.append_message(first, NewMessage::user("hello from the user"));
    store.append_message(first, NewMessage::ai("and a reply"));
    let preview_ok = store
        .chatroom(first)
        .is_some_and(|room| room.last_message == "and a reply");
    let message_count = store.messages(first).map_or(0, <[_]>::len);

    store.delete_chatroom(first);
    let delete_cascaded = store.messages(first).is_none() && store.chatroom(first).is_none();

    println!("listing_order_ok={listing_order_ok}");
    println!("message_count={message_count}");
    println!("preview_ok={preview_ok}");
    println!("delete_cascaded={delete_cascaded}");

    if !(listing_order_ok && preview_ok && message_count == 2 && delete_cascaded) {
        return ScenarioFailedSnafu {
            stage: "scenario-store-crud-assert",
            scenario: "store_crud",
            reason: "chatroom CRUD or preview behavior mismatch".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

fn run_streaming_lifecycle() -> RunnerResult<()> {
    let mut store = ChatStore::new();
    let chatroom_id = store.create_chatroom("Streaming", None);
    let message_id = MessageId::new_random();

    store.begin_streaming(chatroom_id, message_id);
    let invisible_before_first_chunk = store
        .messages(chatroom_id)
        .is_some_and(<[_]>::is_empty);

    store.append_streaming_chunk(message_id, "Hel");
    store.append_streaming_chunk(message_id, "lo ");
    store.append_streaming_chunk(MessageId::new_random(), "stale chunk");
    store.append_streaming_chunk(message_id, "world");
    store.end_streaming(message_id, None);

    let messages = store.messages(chatroom_id).unwrap_or_default();
    let finalized_ok = messages.len() == 1
        && messages[0].text == "Hello world"
        && !messages[0].is_streaming
        && messages[0].sender == Sender::Ai;
    let pending_cleared = store.pending_stream().is_none();

    println!("invisible_before_first_chunk={invisible_before_first_chunk}");
    println!("finalized_ok={finalized_ok}");
    println!("pending_cleared={pending_cleared}");

    if !(invisible_before_first_chunk && finalized_ok && pending_cleared) {
        return ScenarioFailedSnafu {
            stage: "scenario-streaming-lifecycle-assert",
            scenario: "streaming_lifecycle",
            reason: "streaming chunk accumulation or finalization mismatch".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_fallback_cascade() -> RunnerResult<()> {
    let provider = ResponseProvider::new(ProviderConfig::offline()).map_err(|error| {
        RunnerError::ScenarioFailed {
            stage: "scenario-fallback-cascade-provider",
            scenario: "fallback_cascade",
            reason: format!("provider construction failed: {error}"),
        }
    })?;

    let glimmer_provider::TurnHandle { mut stream, worker } =
        provider.respond(TurnRequest::new("Can you help me plan a project?"));
    tokio::spawn(worker);

    let mut deltas = String::new();
    let mut outcome = None;
    while let Some(event) = stream.recv().await {
        match event {
            TurnEvent::Delta(fragment) => deltas.push_str(&fragment),
            TurnEvent::Completed(final_outcome) => {
                outcome = Some(final_outcome);
                break;
            }
        }
    }

    let outcome = outcome.context(ScenarioFailedSnafu {
        stage: "scenario-fallback-cascade-outcome",
        scenario: "fallback_cascade",
        reason: "turn ended without a terminal outcome".to_string(),
    })?;
    let synthetic_tier_used = !outcome.is_real_api;
    let deltas_match_outcome = deltas == outcome.text;

    println!("synthetic_tier_used={synthetic_tier_used}");
    println!("deltas_match_outcome={deltas_match_outcome}");
    println!("outcome_chars={}", outcome.text.chars().count());

    if !(synthetic_tier_used && deltas_match_outcome && !outcome.text.is_empty()) {
        return ScenarioFailedSnafu {
            stage: "scenario-fallback-cascade-assert",
            scenario: "fallback_cascade",
            reason: "offline cascade did not resolve through the local generator".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_pagination() -> RunnerResult<()> {
    let loader = HistoryLoader::new()
        .with_load_delay(Duration::from_millis(1))
        .with_reference_time(1_700_000_000_000);
    let mut paginator = Paginator::new();

    let mut total_loaded = 0usize;
    let mut previous_oldest: Option<u64> = None;
    let mut pages_strictly_older = true;

    while let Some(page) = paginator.claim_next() {
        let batch = loader.load_page(page).await;
        let chronological = batch
            .windows(2)
            .all(|pair| pair[0].timestamp_unix_ms <= pair[1].timestamp_unix_ms);
        if !chronological {
            return ScenarioFailedSnafu {
                stage: "scenario-pagination-order",
                scenario: "pagination",
                reason: format!("page {page} is not in chronological order"),
            }
            .fail();
        }

        if let (Some(previous), Some(newest)) = (previous_oldest, batch.last()) {
            if newest.timestamp_unix_ms >= previous {
                pages_strictly_older = false;
            }
        }
        previous_oldest = batch.first().map(|message| message.timestamp_unix_ms);
        total_loaded += batch.len();
    }

    let page_cap_enforced = paginator.pages_loaded() == MAX_HISTORY_PAGES;
    let expected_total = DEFAULT_PAGE_SIZE * MAX_HISTORY_PAGES as usize;

    println!("total_loaded={total_loaded}");
    println!("pages_strictly_older={pages_strictly_older}");
    println!("page_cap_enforced={page_cap_enforced}");

    if !(page_cap_enforced && pages_strictly_older && total_loaded == expected_total) {
        return ScenarioFailedSnafu {
            stage: "scenario-pagination-assert",
            scenario: "pagination",
            reason: format!(
                "expected {expected_total} strictly aging messages across {MAX_HISTORY_PAGES} pages, got {total_loaded}"
            ),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

fn run_snapshot_roundtrip(state_path: Option<&str>) -> RunnerResult<()> {
    let path = state_path.map(PathBuf::from).unwrap_or_else(|| {
        std::env::temp_dir()
            .join("glimmer-qa")
            .join(format!("snapshot-{}.json", ChatroomId::new_random()))
    });

    let mut store = ChatStore::new();
    let chatroom_id = store.create_chatroom("Persisted", None);
    store.append_message(chatroom_id, NewMessage::user("write me down"));
    store.append_message(chatroom_id, NewMessage::ai("noted"));

    let state_file = StateFile::new(path.clone());
    state_file
        .save(&store.snapshot())
        .context(StoreValidationSnafu {
            stage: "scenario-snapshot-save",
        })?;

    let restored = state_file
        .load()
        .context(StoreValidationSnafu {
            stage: "scenario-snapshot-load",
        })?
        .context(ScenarioFailedSnafu {
            stage: "scenario-snapshot-missing",
            scenario: "snapshot_roundtrip",
            reason: "saved snapshot missing on reload".to_string(),
        })?;

    let revived = ChatStore::from_snapshot(restored);
    let messages_ok = revived
        .messages(chatroom_id)
        .is_some_and(|messages| messages.len() == 2 && messages[1].text == "noted");
    let preview_ok = revived
        .chatroom(chatroom_id)
        .is_some_and(|room| room.last_message == "noted");

    if state_path.is_none() {
        let _ = std::fs::remove_file(&path);
    }

    println!("messages_ok={messages_ok}");
    println!("preview_ok={preview_ok}");

    if !(messages_ok && preview_ok) {
        return ScenarioFailedSnafu {
            stage: "scenario-snapshot-assert",
            scenario: "snapshot_roundtrip",
            reason: "snapshot roundtrip lost messages or preview state".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}
