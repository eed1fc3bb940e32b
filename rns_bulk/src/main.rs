use ethers::types::Address;
use rns_bulk::commit_reveal::Readiness;
use rns_bulk::cost::{CostWatcher, QuoteStatus, format_rif};
use rns_bulk::domains::unix_now;
use rns_bulk::rns::fqdn;
use rns_bulk::types::BatchOutcome;
use rns_bulk::{
    AvailabilityState, DomainIndex, DomainRequest, DomainRow, EthersRnsClient, NetworkConfig,
    RnsClient, SessionPhase, SigningGate, SigningRequest, TransactionOrchestrator, WorkflowConfig,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type Orchestrator = TransactionOrchestrator<EthersRnsClient, TerminalGate>;

/// Quiet period before a batch being typed in is priced
const COST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Asks on the terminal before every transaction
struct TerminalGate;

impl SigningGate for TerminalGate {
    async fn confirm(&self, request: &SigningRequest) -> bool {
        let mut prompt = format!("\n✍️  {}: {}", request.step, request.summary);
        if let Some(amount) = request.amount {
            prompt.push_str(&format!(" ({})", format_rif(amount)));
        }
        prompt.push_str("\n   Proceed? (y/n): ");

        tokio::task::spawn_blocking(move || read_input(&prompt).eq_ignore_ascii_case("y"))
            .await
            .unwrap_or(false)
    }
}

fn print_menu() {
    println!("\n========================================");
    println!("       RNS Bulk Manager");
    println!("========================================");
    println!("1. Check availability");
    println!("2. Register names in bulk");
    println!("3. Renew names in bulk");
    println!("4. Set address records");
    println!("5. Set resolver");
    println!("6. List my domains");
    println!("7. Exit");
    println!("========================================");
}

fn read_input(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = io::stdout().flush();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return String::new();
    }
    input.trim().to_string()
}

/// Read names one per line until an empty line
fn read_names(prompt: &str) -> Vec<String> {
    println!("{}", prompt);
    let mut names = Vec::new();
    loop {
        let line = read_input("   > ");
        if line.is_empty() {
            break;
        }
        names.push(line);
    }
    names
}

fn read_years() -> u64 {
    match read_input("Duration in years (1-5): ").parse() {
        Ok(y) if (1..=5).contains(&y) => y,
        _ => {
            println!("❌ Invalid duration! Using 1 year.");
            1
        }
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    println!("\n   Tx: {:?}", outcome.tx_hash);
    for domain in &outcome.domains {
        match &domain.error_message {
            None => println!("   ✅ {}", fqdn(&domain.name)),
            Some(reason) => println!("   ❌ {}: {}", fqdn(&domain.name), reason),
        }
    }
}

async fn register_batch(orchestrator: &Arc<Orchestrator>) {
    let watcher = CostWatcher::spawn(orchestrator.cost().clone(), COST_DEBOUNCE);
    let owner = orchestrator.chain().sender();
    let years = read_years();

    println!("\nEnter names to register, one per line (empty line to finish):");
    let mut rows = Vec::new();
    let mut generation = 0;
    loop {
        let line = tokio::task::spawn_blocking(|| read_input("   > "))
            .await
            .unwrap_or_default();
        if line.is_empty() {
            break;
        }

        let request = match DomainRequest::for_years(&line, years, owner) {
            Ok(request) => request,
            Err(e) => {
                println!("     ❌ {}", e.user_message());
                continue;
            }
        };
        let availability = orchestrator.availability().check(&request.name).await;
        let mark = match availability {
            AvailabilityState::Available => "✅ available",
            AvailabilityState::Unavailable => "❌ taken",
            AvailabilityState::Unknown => "⚠️  too short to check",
        };
        println!("     {} {}", fqdn(&request.name), mark);

        rows.push(DomainRow {
            request,
            availability,
        });
        generation = watcher.update(rows.clone());
    }

    if rows.is_empty() {
        println!("❌ No names entered!");
        return;
    }

    let quote = watcher.settled(generation).await;
    match &quote.status {
        QuoteStatus::Priced => println!("\n💰 Total: {}", format_rif(quote.total)),
        QuoteStatus::NotAllAvailable => {
            println!("\n❌ Every name must be available before the batch can be priced.");
            return;
        }
        QuoteStatus::Unpriceable { reason } => {
            println!("\n❌ Cannot price this batch right now: {}", reason);
            return;
        }
        QuoteStatus::Empty | QuoteStatus::Pending => return,
    }

    let mut session = orchestrator.new_session(rows);
    let mut status = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut last_phase = None;
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            if last_phase != Some(snapshot.phase) {
                println!("   ⏳ {:?}", snapshot.phase);
                last_phase = Some(snapshot.phase);
            }
            if let Some(Readiness::Pending { ready, total }) = snapshot.readiness {
                print!("\r   {}/{} commitments mature  ", ready, total);
                let _ = io::stdout().flush();
            }
        }
    });

    loop {
        match orchestrator.register(&mut session).await {
            Ok(outcome) => {
                println!("\n🎉 Batch confirmed!");
                print_outcome(&outcome);
                break;
            }
            Err(e) => {
                println!("\n❌ {}", e.user_message());
                let retry = e.is_recoverable() && session.phase() != SessionPhase::Abandoned;
                if !retry || !read_input("Retry? (y/n): ").eq_ignore_ascii_case("y") {
                    if !session.batch().commitments().is_empty() {
                        println!("   Unused commitments will expire on their own.");
                    }
                    session.abandon();
                    break;
                }
            }
        }
    }

    drop(session);
    let _ = printer.await;
}

async fn renew_batch(orchestrator: &Orchestrator) {
    let names = read_names("\nEnter names to renew, one per line (empty line to finish):");
    if names.is_empty() {
        println!("❌ No names entered!");
        return;
    }
    let years = read_years();
    let owner = orchestrator.chain().sender();
    let requests = match names
        .iter()
        .map(|n| DomainRequest::for_years(n, years, owner))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(requests) => requests,
        Err(e) => {
            println!("❌ {}", e.user_message());
            return;
        }
    };

    let quote = orchestrator.cost().renewal_cost(&requests).await;
    if !quote.is_priced() {
        println!("❌ Cannot price this renewal right now.");
        return;
    }
    println!("\n💰 Total: {}", format_rif(quote.total));

    match orchestrator.renew(requests).await {
        Ok(outcome) => {
            println!("\n🎉 Renewal confirmed!");
            print_outcome(&outcome);
        }
        Err(e) => println!("\n❌ {}", e.user_message()),
    }
}

async fn set_addresses(orchestrator: &Orchestrator) {
    let names = read_names("\nEnter names to update, one per line (empty line to finish):");
    let mut targets = Vec::new();
    for name in names {
        let input = read_input(&format!("Address for {} (0x...): ", fqdn(&name)));
        match input.parse::<Address>() {
            Ok(address) => targets.push((name, address)),
            Err(_) => {
                println!("❌ Invalid address format! Skipping {}", name);
            }
        }
    }
    if targets.is_empty() {
        println!("❌ Nothing to update!");
        return;
    }

    match orchestrator.set_addresses(targets).await {
        Ok(outcome) => {
            println!("\n✅ Address records updated!");
            print_outcome(&outcome);
        }
        Err(e) => println!("\n❌ {}", e.user_message()),
    }
}

async fn set_resolver(orchestrator: &Orchestrator) {
    let names = read_names("\nEnter names to update, one per line (empty line to finish):");
    let resolver: Address = match read_input("Resolver address (0x...): ").parse() {
        Ok(address) => address,
        Err(_) => {
            println!("❌ Invalid address format!");
            return;
        }
    };

    match orchestrator.set_resolver(names, resolver).await {
        Ok(outcome) => {
            println!("\n✅ Resolver updated!");
            print_outcome(&outcome);
        }
        Err(e) => println!("\n❌ {}", e.user_message()),
    }
}

async fn list_domains(orchestrator: &Orchestrator, index: &DomainIndex<EthersRnsClient>) {
    let user = orchestrator.chain().sender();
    println!("\n🔍 Scanning recent registrations...");

    match index.owned_domains(user).await {
        Ok(domains) if domains.is_empty() => {
            println!("\n📭 No domains found in the recent history window.");
        }
        Ok(domains) => {
            let now = unix_now();
            println!("\n📖 Your Domains:");
            println!("   {:<25} {}", "Name", "Expires");
            println!("   {}", "-".repeat(50));
            for domain in &domains {
                let expiry = if domain.is_expired(now) {
                    "expired".to_string()
                } else {
                    format!("in {} day(s)", domain.days_until_expiry(now))
                };
                println!("   {:<25} {}", domain.fqdn, expiry);
            }
            orchestrator
                .availability()
                .set_owned(domains.into_iter().map(|d| d.name));
        }
        Err(e) => println!("\n❌ {}", e.user_message()),
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .compact()
        .init();

    let network = NetworkConfig::from_env()?;
    let workflow = WorkflowConfig::from_env()?;
    let client = Arc::new(EthersRnsClient::new(&network, &workflow)?);
    let index = DomainIndex::new(client.clone(), workflow.call_timeout);
    let orchestrator = Arc::new(TransactionOrchestrator::new(client.clone(), TerminalGate, workflow));

    println!("\n🚀 Welcome to the RNS Bulk Manager!");
    println!("   Network: {} (chain {})", network.network.name(), network.network.chain_id());
    println!("   Wallet:  {:?}", client.sender());
    match client.gas_balance().await {
        Ok(balance) => println!("   Gas:     {} wei", balance),
        Err(e) => println!("⚠️  Could not read gas balance: {}", e),
    }
    if network.network.is_testnet() {
        println!("   Registrations on testnet cost test RIF.");
    }

    loop {
        print_menu();
        let choice = read_input("Choose an option: ");

        match choice.as_str() {
            "1" => {
                let name = read_input("\nEnter name to check (without .rsk): ");
                let state = orchestrator.availability().check(&name).await;
                match state {
                    AvailabilityState::Available => println!("✅ {} is available!", fqdn(&name)),
                    AvailabilityState::Unavailable => println!("❌ {} is taken.", fqdn(&name)),
                    AvailabilityState::Unknown => {
                        println!("⚠️  Names need at least 3 characters.")
                    }
                }
            }
            "2" => register_batch(&orchestrator).await,
            "3" => renew_batch(&orchestrator).await,
            "4" => set_addresses(&orchestrator).await,
            "5" => set_resolver(&orchestrator).await,
            "6" => list_domains(&orchestrator, &index).await,
            "7" => {
                println!("\n👋 Goodbye!");
                break;
            }
            _ => {
                println!("\n❌ Invalid option. Please choose 1-7.");
            }
        }
    }

    Ok(())
}

