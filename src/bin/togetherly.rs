use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use togetherly::config::ClientOptions;
use togetherly::couple::birthday::event_timestamp;
use togetherly::couple::{CoupleProfile, CoupleProfileUpdate, Event, NewEvent, Partner};
use togetherly::error::Error;
use togetherly::router::Navigation;
use togetherly::Togetherly;

#[derive(Parser)]
#[command(name = "togetherly", version, about = "Shared calendar for two")]
struct Cli {
    /// Project base URL
    #[arg(long, env = "TOGETHERLY_URL")]
    url: String,

    /// Anonymous API key
    #[arg(long, env = "TOGETHERLY_KEY")]
    key: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login { email: String, password: String },
    /// Create an account
    Register { email: String, password: String },
    /// Sign out and forget the stored session
    Logout,
    /// Show the couple profile
    Profile,
    /// List upcoming and past events
    Events,
    /// Add an event
    AddEvent {
        title: String,
        /// Date as YYYY-MM-DD
        date: NaiveDate,
        #[arg(long = "type", default_value = "other")]
        event_type: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete an event by id
    DeleteEvent { id: String },
    /// Set a partner's birthday (and optionally name)
    SetBirthday {
        #[arg(value_enum)]
        partner: PartnerArg,
        /// Date as YYYY-MM-DD
        date: NaiveDate,
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the event list on every change until interrupted
    WatchEvents,
    /// Check whether a route may be entered right now
    Navigate { path: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum PartnerArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<PartnerArg> for Partner {
    fn from(arg: PartnerArg) -> Self {
        match arg {
            PartnerArg::One => Partner::One,
            PartnerArg::Two => Partner::Two,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let app = Togetherly::new_with_options(&cli.url, &cli.key, ClientOptions::from_env())?;
    let session = app.session();
    let user = session.verify_auth().await;
    debug!(signed_in = user.is_some(), "Session resolved");

    match cli.command {
        Command::Login { email, password } => {
            let identity = session.login(&email, &password).await?;
            println!("Signed in as {}", identity.email.as_deref().unwrap_or(&identity.id));
        }
        Command::Register { email, password } => {
            let identity = session.register(&email, &password).await?;
            println!("Registered {}", identity.email.as_deref().unwrap_or(&identity.id));
        }
        Command::Logout => {
            session.logout().await?;
            println!("Signed out");
        }
        Command::Profile => {
            let profile = load_profile(&app).await?;
            print_profile(&profile, app.couple().days_together_count());
        }
        Command::Events => {
            let profile = load_profile(&app).await?;
            for event in app.couple().get_events(&profile.id).await? {
                print_event(&event);
            }
        }
        Command::AddEvent {
            title,
            date,
            event_type,
            description,
        } => {
            let profile = load_profile(&app).await?;
            let event = app
                .couple()
                .add_event(
                    &profile.id,
                    NewEvent {
                        title,
                        date: event_timestamp(date),
                        event_type: event_type.into(),
                        description,
                    },
                )
                .await?;
            print_event(&event);
        }
        Command::DeleteEvent { id } => {
            app.couple().delete_event(&id).await?;
            println!("Deleted {}", id);
        }
        Command::SetBirthday {
            partner,
            date,
            name,
        } => {
            let profile = load_profile(&app).await?;
            let partner = Partner::from(partner);
            let mut update = CoupleProfileUpdate::default().with_birthday(partner, date);
            if let Some(name) = name {
                update = update.with_name(partner, &name);
            }
            app.couple().update_couple_profile(&profile.id, update).await?;
            for event in app.couple().events() {
                print_event(&event);
            }
        }
        Command::WatchEvents => {
            let profile = load_profile(&app).await?;
            let subscription = app.couple().subscribe_to_events(&profile.id, |events| {
                println!("--- {} events", events.len());
                for event in events {
                    print_event(event);
                }
            });
            tokio::signal::ctrl_c().await?;
            subscription.unsubscribe();
        }
        Command::Navigate { path } => match app.router().before_each(&path).await {
            Navigation::Proceed => println!("{}", path),
            Navigation::Redirect(to) => println!("{} -> {}", path, to),
        },
    }

    Ok(())
}

async fn load_profile(app: &Togetherly) -> Result<CoupleProfile, Error> {
    let user = app
        .session()
        .user()
        .ok_or_else(|| Error::auth("Not logged in"))?;
    app.couple()
        .get_couple_data(&user.id)
        .await?
        .ok_or_else(|| Error::general("No couple profile yet"))
}

fn print_profile(profile: &CoupleProfile, days_together: i64) {
    println!("{} & {}", profile.partner1_name, profile.partner2_name);
    for partner in Partner::BOTH {
        if let Some(birthday) = profile.partner_birthday(partner) {
            println!("  {} birthday: {}", profile.partner_name(partner), birthday);
        }
    }
    println!("  {} days together", days_together);
}

fn print_event(event: &Event) {
    println!(
        "{}  {}  [{}]  {}",
        event.date.date_naive(),
        event.title,
        event.event_type,
        event.id
    );
}
