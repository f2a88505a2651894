use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use psyche_core::*;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "psyche")]
#[command(about = "Patient/psychologist matching and treatment scheduling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evaluate the command at this time (seconds since the Unix epoch)
    #[arg(long, global = true)]
    now: Option<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage patient profiles
    Patient {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// Manage psychologist profiles
    Psychologist {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// Manage price ranges
    PriceRange {
        #[command(subcommand)]
        command: PriceRangeCommand,
    },

    /// Import characteristic choices and preferences
    Characteristics {
        #[command(subcommand)]
        command: CharacteristicsCommand,
    },

    /// Treatment lifecycle
    Treatment {
        #[command(subcommand)]
        command: TreatmentCommand,
    },

    /// Create the next appointment of every active treatment
    Generate,

    /// Appointment negotiation
    Appointment {
        #[command(subcommand)]
        command: AppointmentCommand,
    },

    /// Show the ranked psychologists for a patient
    Affinities {
        #[arg(long)]
        patient: Uuid,
    },

    /// Cooldown maintenance
    Cooldowns {
        #[command(subcommand)]
        command: CooldownsCommand,
    },

    /// Mail outbox
    Mail {
        #[command(subcommand)]
        command: MailCommand,
    },

    /// Export appointments to a CSV calendar
    Export {
        /// Output CSV file
        #[arg(long)]
        output: PathBuf,

        /// Only appointments this profile takes part in
        #[arg(long)]
        profile: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum PriceRangeCommand {
    Add {
        #[arg(long)]
        name: String,
        /// Comma-separated income codes, e.g. LOW,MEDIUM
        #[arg(long)]
        eligible: String,
    },
}

#[derive(Subcommand)]
enum CharacteristicsCommand {
    /// CSV columns: profile_id,kind,characteristic,value,weight
    Import { file: PathBuf },
}

#[derive(clap::Args)]
struct ScheduleArgs {
    /// Base intervals between occurrences
    #[arg(long)]
    frequency: u32,
    /// Offset in seconds into the schedule interval
    #[arg(long)]
    phase: i64,
    /// Session length in seconds
    #[arg(long)]
    duration: i64,
}

impl ScheduleArgs {
    fn schedule(&self) -> Schedule {
        Schedule {
            frequency: self.frequency,
            phase: self.phase,
            duration: self.duration,
        }
    }
}

#[derive(Subcommand)]
enum TreatmentCommand {
    Create {
        #[arg(long)]
        psychologist: Uuid,
        #[command(flatten)]
        schedule: ScheduleArgs,
        #[arg(long)]
        price_range: String,
    },
    Update {
        #[arg(long)]
        psychologist: Uuid,
        #[arg(long)]
        treatment: Uuid,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Required once the treatment is active
        #[arg(long)]
        price_range: Option<String>,
    },
    Delete {
        #[arg(long)]
        psychologist: Uuid,
        #[arg(long)]
        treatment: Uuid,
        #[arg(long)]
        price_range: String,
    },
    Assign {
        #[arg(long)]
        patient: Uuid,
        #[arg(long)]
        treatment: Uuid,
        #[arg(long)]
        price_range: String,
    },
    Finalize {
        #[arg(long)]
        psychologist: Uuid,
        #[arg(long)]
        treatment: Uuid,
    },
    Interrupt {
        #[arg(long = "as", value_enum)]
        side: Side,
        #[arg(long)]
        profile: Uuid,
        #[arg(long)]
        treatment: Uuid,
        #[arg(long)]
        reason: String,
    },
    List {
        #[arg(long)]
        psychologist: Uuid,
    },
    /// Pending treatments the patient could take
    Available {
        #[arg(long)]
        patient: Uuid,
    },
}

#[derive(Subcommand)]
enum AppointmentCommand {
    Confirm {
        #[arg(long = "as", value_enum)]
        side: Side,
        #[arg(long)]
        profile: Uuid,
        #[arg(long)]
        appointment: Uuid,
    },
    Edit {
        #[arg(long = "as", value_enum)]
        side: Side,
        #[arg(long)]
        profile: Uuid,
        #[arg(long)]
        appointment: Uuid,
        /// New start, seconds since the Unix epoch
        #[arg(long)]
        start: i64,
        /// New end (psychologist only)
        #[arg(long)]
        end: Option<i64>,
        /// New price range (psychologist only)
        #[arg(long)]
        price_range: Option<String>,
        #[arg(long)]
        reason: String,
    },
    Cancel {
        #[arg(long = "as", value_enum)]
        side: Side,
        #[arg(long)]
        profile: Uuid,
        #[arg(long)]
        appointment: Uuid,
        #[arg(long)]
        reason: String,
    },
    List {
        #[arg(long)]
        profile: Uuid,
    },
}

#[derive(Subcommand)]
enum CooldownsCommand {
    /// Remove expired cooldowns
    Prune,
}

#[derive(Subcommand)]
enum MailCommand {
    /// Deliver pending mail to the outbox file
    Flush,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Patient,
    Psychologist,
}

impl From<Side> for Party {
    fn from(side: Side) -> Self {
        match side {
            Side::Patient => Party::Patient,
            Side::Psychologist => Party::Psychologist,
        }
    }
}

fn main() -> ExitCode {
    psyche_core::logging::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let now = match cli.now {
        Some(secs) => timestamp(secs)?,
        None => Utc::now(),
    };

    let ctx = Context {
        engine: Engine::new(&config),
        store_path: data_dir.join("store.json"),
        data_dir,
        now,
    };
    tracing::debug!("Using store {:?} at {}", ctx.store_path, now);

    match cli.command {
        Commands::Patient {
            command: ProfileCommand::Add { name, email },
        } => ctx.mutate(|db| {
            let patient = Patient {
                id: Uuid::new_v4(),
                name,
                email,
            };
            db.patients.insert(patient.clone())?;
            Ok(patient.id)
        })
        .map(|id| println!("{}", id)),
        Commands::Psychologist {
            command: ProfileCommand::Add { name, email },
        } => ctx.mutate(|db| {
            let psychologist = Psychologist {
                id: Uuid::new_v4(),
                name,
                email,
            };
            db.psychologists.insert(psychologist.clone())?;
            Ok(psychologist.id)
        })
        .map(|id| println!("{}", id)),
        Commands::PriceRange {
            command: PriceRangeCommand::Add { name, eligible },
        } => ctx.mutate(|db| {
            if db.price_range(&name).is_some() {
                return Err(Error::Conflict(format!(
                    "price range {} already exists",
                    name
                )));
            }
            let range = PriceRange {
                id: Uuid::new_v4(),
                name,
                eligible_incomes: eligible,
            };
            db.price_ranges.insert(range.clone())?;
            Ok(range.id)
        })
        .map(|id| println!("{}", id)),
        Commands::Characteristics {
            command: CharacteristicsCommand::Import { file },
        } => {
            let summary = ctx.mutate(|db| import_characteristics(db, &file))?;
            println!(
                "Imported {} choices and {} preferences",
                summary.choices, summary.preferences
            );
            Ok(())
        }
        Commands::Treatment { command } => cmd_treatment(&ctx, command),
        Commands::Generate => {
            let caller = ctx.engine.automation_caller();
            let generated =
                ctx.mutate(|db| ctx.engine.appointments.generate_pending(db, &caller, now))?;
            for appointment in &generated {
                print_appointment(appointment);
            }
            Ok(())
        }
        Commands::Appointment { command } => cmd_appointment(&ctx, command),
        Commands::Affinities { patient } => {
            let affinities =
                ctx.mutate(|db| ctx.engine.matching.get_top_affinities(db, patient, now))?;
            for affinity in affinities {
                println!(
                    "{} {} {}",
                    affinity.psychologist_id,
                    affinity.score_for_patient,
                    affinity.score_for_psychologist
                );
            }
            Ok(())
        }
        Commands::Cooldowns {
            command: CooldownsCommand::Prune,
        } => {
            let removed = ctx.mutate(|db| Ok(ctx.engine.cooldowns.prune_expired(db, now)))?;
            println!("Pruned {} expired cooldowns", removed);
            Ok(())
        }
        Commands::Mail {
            command: MailCommand::Flush,
        } => {
            let sink = JsonlMailSink::new(ctx.data_dir.join("outbox.jsonl"));
            let delivered = ctx.mutate(|db| dispatch_pending(db, &sink))?;
            println!("Delivered {} mails", delivered);
            Ok(())
        }
        Commands::Export { output, profile } => {
            let db = Database::load(&ctx.store_path)?;
            let count = export_appointments(&db, profile, &output)?;
            println!("Exported {} appointments to {}", count, output.display());
            Ok(())
        }
    }
}

struct Context {
    engine: Engine,
    data_dir: PathBuf,
    store_path: PathBuf,
    now: DateTime<Utc>,
}

impl Context {
    /// Run `f` against the store and persist the result if it succeeds.
    /// Output belongs after this returns, once the write is on disk.
    fn mutate<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T>,
    {
        Database::update(&self.store_path, f)
    }

    fn read(&self) -> Result<Database> {
        Database::load(&self.store_path)
    }
}

fn cmd_treatment(ctx: &Context, command: TreatmentCommand) -> Result<()> {
    let lifecycle = &ctx.engine.treatments;
    let now = ctx.now;

    match command {
        TreatmentCommand::Create {
            psychologist,
            schedule,
            price_range,
        } => ctx.mutate(|db| {
            let input = NewTreatment {
                schedule: schedule.schedule(),
                price_range_name: price_range,
            };
            lifecycle.create(db, psychologist, input)
        })
        .map(|treatment| println!("{}", treatment.id)),
        TreatmentCommand::Update {
            psychologist,
            treatment,
            schedule,
            price_range,
        } => ctx.mutate(|db| {
            let input = TreatmentUpdate {
                schedule: schedule.schedule(),
                price_range_name: price_range,
            };
            lifecycle.update(db, psychologist, treatment, input, now)
        })
        .map(|updated| print_treatment(&updated)),
        TreatmentCommand::Delete {
            psychologist,
            treatment,
            price_range,
        } => ctx
            .mutate(|db| lifecycle.delete(db, psychologist, treatment, &price_range))
            .map(|_| println!("Deleted {}", treatment)),
        TreatmentCommand::Assign {
            patient,
            treatment,
            price_range,
        } => ctx
            .mutate(|db| lifecycle.assign(db, patient, treatment, &price_range, now))
            .map(|assigned| print_treatment(&assigned)),
        TreatmentCommand::Finalize {
            psychologist,
            treatment,
        } => ctx
            .mutate(|db| lifecycle.finalize(db, psychologist, treatment, now))
            .map(|finalized| print_treatment(&finalized)),
        TreatmentCommand::Interrupt {
            side,
            profile,
            treatment,
            reason,
        } => ctx
            .mutate(|db| match side {
                Side::Patient => {
                    lifecycle.interrupt_by_patient(db, profile, treatment, &reason, now)
                }
                Side::Psychologist => {
                    lifecycle.interrupt_by_psychologist(db, profile, treatment, &reason, now)
                }
            })
            .map(|interrupted| print_treatment(&interrupted)),
        TreatmentCommand::List { psychologist } => {
            let db = ctx.read()?;
            for treatment in lifecycle.list_for_psychologist(&db, psychologist) {
                print_treatment(&treatment);
            }
            Ok(())
        }
        TreatmentCommand::Available { patient } => {
            let db = ctx.read()?;
            for treatment in lifecycle.available_for_patient(&db, patient)? {
                print_treatment(&treatment);
            }
            Ok(())
        }
    }
}

fn cmd_appointment(ctx: &Context, command: AppointmentCommand) -> Result<()> {
    let lifecycle = &ctx.engine.appointments;
    let now = ctx.now;

    match command {
        AppointmentCommand::Confirm {
            side,
            profile,
            appointment,
        } => ctx
            .mutate(|db| lifecycle.confirm(db, side.into(), profile, appointment))
            .map(|confirmed| print_appointment(&confirmed)),
        AppointmentCommand::Edit {
            side,
            profile,
            appointment,
            start,
            end,
            price_range,
            reason,
        } => {
            let start = timestamp(start)?;
            let edited = ctx.mutate(|db| match side {
                Side::Patient => {
                    if end.is_some() || price_range.is_some() {
                        return Err(Error::Validation(
                            "patients can only move the start of an appointment".into(),
                        ));
                    }
                    lifecycle.edit_by_patient(
                        db,
                        profile,
                        appointment,
                        PatientEdit { start, reason },
                        now,
                    )
                }
                Side::Psychologist => {
                    let end = match end {
                        Some(secs) => timestamp(secs)?,
                        None => {
                            return Err(Error::Validation(
                                "--end is required when editing as psychologist".into(),
                            ));
                        }
                    };
                    lifecycle.edit_by_psychologist(
                        db,
                        profile,
                        appointment,
                        PsychologistEdit {
                            start,
                            end,
                            price_range_name: price_range,
                            reason,
                        },
                        now,
                    )
                }
            })?;
            print_appointment(&edited);
            Ok(())
        }
        AppointmentCommand::Cancel {
            side,
            profile,
            appointment,
            reason,
        } => ctx
            .mutate(|db| lifecycle.cancel(db, side.into(), profile, appointment, reason))
            .map(|canceled| print_appointment(&canceled)),
        AppointmentCommand::List { profile } => {
            let db = ctx.read()?;
            for appointment in lifecycle.list_for_profile(&db, profile) {
                print_appointment(&appointment);
            }
            Ok(())
        }
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Validation(format!("timestamp {} is out of range", secs)))
}

fn print_treatment(treatment: &Treatment) {
    println!(
        "{} {} frequency={} phase={} duration={} patient={} price_range={}",
        treatment.id,
        treatment.status,
        treatment.schedule.frequency,
        treatment.schedule.phase,
        treatment.schedule.duration,
        treatment
            .patient_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
        treatment.price_range_name.as_deref().unwrap_or("-"),
    );
}

fn print_appointment(appointment: &Appointment) {
    println!(
        "{} {} start={} end={} treatment={}",
        appointment.id,
        appointment.status,
        appointment.start.timestamp(),
        appointment.end.timestamp(),
        appointment.treatment_id,
    );
}
