use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{ComponentChange, LedgerService, ReconciliationJob};
use crate::config::LedgerConfig;
use crate::domain::{ComponentKind, FeeComponent, FeeTotals, RawTerms, format_cents};

/// Feeledger - class fee ledger
#[derive(Parser)]
#[command(name = "feeledger")]
#[command(about = "Keeps per-class fee totals consistent with their payment components")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "FEELEDGER_DB", default_value = "feeledger.db")]
    pub database: String,

    /// How long a change waits for its class locks, in milliseconds
    #[arg(long, env = "FEELEDGER_LOCK_TIMEOUT_MS", default_value = "10000")]
    pub lock_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Class management commands
    #[command(subcommand)]
    Class(ClassCommands),

    /// Fee component commands
    #[command(subcommand)]
    Component(ComponentCommands),

    /// Show the fees a student enrolling in a class would be charged
    Snapshot {
        /// Class name
        class: String,
    },

    /// Recompute class totals from their components and repair drift
    Reconcile {
        /// Class to reconcile
        #[arg(required_unless_present = "all")]
        class: Option<String>,

        /// Reconcile every class
        #[arg(long, conflicts_with = "class")]
        all: bool,

        /// Only report drift, change nothing; fails if any is found
        #[arg(long)]
        check: bool,
    },

    /// Export the fee structure to CSV or JSON
    Export {
        /// What to export: classes, components, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json (default: csv, json for full)
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ClassCommands {
    /// Create a new class with zero fees
    Create {
        /// Class name (must be unique)
        name: String,
    },

    /// List all classes with their totals
    List,

    /// Show a class with its fee components
    Show {
        /// Class name
        name: String,
    },

    /// Delete a class that has no fee components
    Delete {
        /// Class name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ComponentCommands {
    /// Add a fee component
    Add {
        /// Kind: compulsory, other
        #[arg(short, long, default_value = "compulsory")]
        kind: String,

        /// Schedule name (compulsory) or charge type (other)
        #[arg(short, long)]
        name: String,

        /// Owning class (may be omitted for other charges)
        #[arg(short, long)]
        class: Option<String>,

        /// Term 1 amount (e.g., "1500" or "1500.00")
        term1: String,

        /// Term 2 amount
        term2: String,

        /// Term 3 amount
        term3: String,
    },

    /// Change a component's terms, class or name
    Edit {
        /// Component ID
        id: String,

        /// New owning class
        #[arg(short, long, conflicts_with = "unbind")]
        class: Option<String>,

        /// Detach an other charge from its class
        #[arg(long)]
        unbind: bool,

        /// New schedule name or charge type
        #[arg(short, long)]
        name: Option<String>,

        /// Term 1 amount
        term1: String,

        /// Term 2 amount
        term2: String,

        /// Term 3 amount
        term3: String,
    },

    /// Delete a component
    Delete {
        /// Component ID
        id: String,
    },

    /// List components
    List {
        /// Filter by kind: compulsory, other
        #[arg(short, long)]
        kind: Option<String>,

        /// Filter by class
        #[arg(short, long)]
        class: Option<String>,
    },

    /// Show one component
    Show {
        /// Component ID
        id: String,
    },
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init => {
                LedgerService::init(config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Class(cmd) => {
                let service = LedgerService::connect(config).await?;
                run_class_command(&service, cmd).await?;
            }

            Commands::Component(cmd) => {
                let service = LedgerService::connect(config).await?;
                run_component_command(&service, cmd).await?;
            }

            Commands::Snapshot { class } => {
                let service = LedgerService::connect(config).await?;
                let snapshot = service.enrollment_snapshot(&class).await?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }

            Commands::Reconcile { class, check, .. } => {
                let service = LedgerService::connect(config).await?;
                run_reconcile_command(&service, class.as_deref(), check).await?;
            }

            Commands::Export {
                export_type,
                output,
                format,
            } => {
                let service = LedgerService::connect(config).await?;
                run_export_command(&service, &export_type, output.as_deref(), format.as_deref())
                    .await?;
            }
        }

        Ok(())
    }
}

async fn run_class_command(service: &LedgerService, cmd: ClassCommands) -> Result<()> {
    match cmd {
        ClassCommands::Create { name } => {
            let class = service.create_class(&name).await?;
            println!("Created class: {}", class.class_name);
        }

        ClassCommands::List => {
            let classes = service.list_classes().await?;
            if classes.is_empty() {
                println!("No classes found.");
            } else {
                print_totals_header("CLASS");
                for class in classes {
                    print_totals_row(&class.class_name, &class.totals);
                }
            }
        }

        ClassCommands::Show { name } => {
            let info = service.get_class_info(&name).await?;

            println!("Class: {}", info.aggregate.class_name);
            println!("  Fee:     {:>12}", format_cents(info.aggregate.totals.fee));
            println!("  Term 1:  {:>12}", format_cents(info.aggregate.totals.t1));
            println!("  Term 2:  {:>12}", format_cents(info.aggregate.totals.t2));
            println!("  Term 3:  {:>12}", format_cents(info.aggregate.totals.t3));
            println!(
                "  Updated: {}",
                info.aggregate.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            if info.components.is_empty() {
                println!("No fee components.");
            } else {
                print_components(&info.components);
            }
        }

        ClassCommands::Delete { name } => {
            service.delete_class(&name).await?;
            println!("Deleted class: {}", name);
        }
    }

    Ok(())
}

async fn run_component_command(service: &LedgerService, cmd: ComponentCommands) -> Result<()> {
    match cmd {
        ComponentCommands::Add {
            kind,
            name,
            class,
            term1,
            term2,
            term3,
        } => {
            let kind = parse_kind(&kind)?;
            let terms = RawTerms::new(term1, term2, term3);
            let component = service
                .create_component(kind, &name, class.as_deref(), &terms)
                .await?;
            println!(
                "Added {} component: {} {} ({})",
                component.kind,
                component.name,
                format_cents(component.amount()),
                component.id
            );
        }

        ComponentCommands::Edit {
            id,
            class,
            unbind,
            name,
            term1,
            term2,
            term3,
        } => {
            let id = parse_id(&id)?;
            // Without --class or --unbind the component stays where it is
            let class_name = if unbind {
                None
            } else {
                match class {
                    Some(class) => Some(class),
                    None => service.get_component(id).await?.class_name,
                }
            };

            let updated = service
                .update_component(
                    id,
                    ComponentChange {
                        class_name,
                        terms: RawTerms::new(term1, term2, term3),
                        name,
                    },
                )
                .await?;
            println!(
                "Updated component: {} {} -> {}",
                updated.name,
                format_cents(updated.amount()),
                updated.class_name.as_deref().unwrap_or("(global)")
            );
        }

        ComponentCommands::Delete { id } => {
            let removed = service.delete_component(parse_id(&id)?).await?;
            println!(
                "Deleted component: {} {}",
                removed.name,
                format_cents(removed.amount())
            );
        }

        ComponentCommands::List { kind, class } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            let components = service.list_components(kind, class.as_deref()).await?;
            if components.is_empty() {
                println!("No components found.");
            } else {
                print_components(&components);
            }
        }

        ComponentCommands::Show { id } => {
            let component = service.get_component(parse_id(&id)?).await?;

            println!("Component: {}", component.id);
            println!("  Kind:    {}", component.kind);
            println!("  Name:    {}", component.name);
            println!(
                "  Class:   {}",
                component.class_name.as_deref().unwrap_or("(global)")
            );
            println!("  Term 1:  {:>12}", format_cents(component.terms.term1));
            println!("  Term 2:  {:>12}", format_cents(component.terms.term2));
            println!("  Term 3:  {:>12}", format_cents(component.terms.term3));
            println!("  Amount:  {:>12}", format_cents(component.amount()));
            println!(
                "  Updated: {}",
                component.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

async fn run_reconcile_command(
    service: &LedgerService,
    class: Option<&str>,
    check: bool,
) -> Result<()> {
    let job = ReconciliationJob::new(service);

    let reports = match (class, check) {
        (Some(class), true) => vec![job.audit(class).await?],
        (Some(class), false) => vec![job.reconcile(class).await?],
        (None, true) => job.audit_all().await?,
        (None, false) => job.reconcile_all().await?,
    };

    if reports.is_empty() {
        println!("No classes to reconcile.");
        return Ok(());
    }

    println!(
        "{:<16} {:>12} {:>12} {:>6}  STATUS",
        "CLASS", "STORED FEE", "COMPUTED FEE", "ITEMS"
    );
    println!("{}", "-".repeat(58));
    for report in &reports {
        let status = match (report.drift, check) {
            (false, _) => "OK",
            (true, true) => "DRIFT",
            (true, false) => "REPAIRED",
        };
        println!(
            "{:<16} {:>12} {:>12} {:>6}  {}",
            report.class_name,
            format_cents(report.stored.fee),
            format_cents(report.computed.fee),
            report.components,
            status
        );
    }

    let drifted = reports.iter().filter(|r| r.drift).count();
    if check && drifted > 0 {
        anyhow::bail!("{} class aggregate(s) out of sync", drifted);
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match (export_type, format.unwrap_or("csv")) {
        ("classes", "csv") => exporter.export_classes_csv(writer).await?,
        ("classes", "json") => exporter.export_classes_json(writer).await?,
        ("components", "csv") => exporter.export_components_csv(writer).await?,
        ("components", "json") => exporter.export_components_json(writer).await?,
        ("full", _) => {
            let snapshot = exporter.export_full_json(writer).await?;
            snapshot.classes.len() + snapshot.components.len()
        }
        (kind @ ("classes" | "components"), other) => {
            anyhow::bail!("Unsupported format '{}' for {}. Use csv or json", other, kind)
        }
        (other, _) => anyhow::bail!(
            "Unknown export type '{}'. Valid types: classes, components, full",
            other
        ),
    };

    if output.is_some() {
        eprintln!("Exported {} record(s)", count);
    }

    Ok(())
}

fn print_totals_header(first: &str) {
    println!(
        "{:<16} {:>12} {:>12} {:>12} {:>12}",
        first, "FEE", "TERM 1", "TERM 2", "TERM 3"
    );
    println!("{}", "-".repeat(68));
}

fn print_totals_row(label: &str, totals: &FeeTotals) {
    println!(
        "{:<16} {:>12} {:>12} {:>12} {:>12}",
        label,
        format_cents(totals.fee),
        format_cents(totals.t1),
        format_cents(totals.t2),
        format_cents(totals.t3)
    );
}

fn print_components(components: &[FeeComponent]) {
    println!(
        "{:<36}  {:<10} {:<16} {:<12} {:>12}",
        "ID", "KIND", "NAME", "CLASS", "AMOUNT"
    );
    println!("{}", "-".repeat(92));
    for c in components {
        println!(
            "{:<36}  {:<10} {:<16} {:<12} {:>12}",
            c.id,
            c.kind.as_str(),
            c.name,
            c.class_name.as_deref().unwrap_or("(global)"),
            format_cents(c.amount())
        );
    }
}

fn parse_kind(kind: &str) -> Result<ComponentKind> {
    ComponentKind::from_str(kind).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid component kind '{}'. Valid kinds: compulsory, other",
            kind
        )
    })
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).context("Invalid component ID format (expected UUID)")
}
