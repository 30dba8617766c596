//! branchfs interactive shell
//!
//! A thin REPL over [`branchfs::FileSystem`]: one line per command,
//! tokenized with backslash escapes (`\s` for a space inside a name),
//! resolved through the persisted verb registry so user-defined aliases
//! survive restarts.

use branchfs::shell::{Command, CommandRegistry};
use branchfs::{FileSystem, NodeKind, SaverOptions, VfsResult};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "branchfs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent branching virtual file system")]
#[command(long_about = "branchfs - persistent virtual file system shell\n\n\
    Files and directories live inside named versions; `branch` forks the\n\
    current version into a new one that shares all unmodified structure.\n\
    Every mutation of the stored tables is logged to a write-ahead log\n\
    and compacted into a snapshot on exit.\n\n\
    Examples:\n\
      branchfs --data-dir ~/.branchfs\n\
      branchfs -c 'mkdir projects'\n\
      echo 'tree' | branchfs")]
struct Cli {
    /// Directory holding the snapshot and write-ahead log
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// WAL entries before automatic compaction
    #[arg(long, default_value_t = 100)]
    wal_threshold: usize,

    /// Disable the write-ahead log (state persists only on clean exit)
    #[arg(long)]
    no_wal: bool,

    /// Run a single command line and exit
    #[arg(short, long)]
    command: Option<String>,
}

/// Verb ids the registry maps identifiers onto.
mod verb {
    pub const LS: u64 = 1;
    pub const CD: u64 = 2;
    pub const UP: u64 = 3;
    pub const PWD: u64 = 4;
    pub const MKDIR: u64 = 5;
    pub const TOUCH: u64 = 6;
    pub const RM: u64 = 7;
    pub const RMDIR: u64 = 8;
    pub const MV: u64 = 9;
    pub const WRITE: u64 = 10;
    pub const CAT: u64 = 11;
    pub const TREE: u64 = 12;
    pub const FIND: u64 = 13;
    pub const CTIME: u64 = 14;
    pub const MTIME: u64 = 15;
    pub const KIND: u64 = 16;
    pub const BRANCH: u64 = 17;
    pub const SWITCH: u64 = 18;
    pub const VERSIONS: u64 = 19;
    pub const ALIAS: u64 = 20;
    pub const UNALIAS: u64 = 21;
    pub const HELP: u64 = 22;
    pub const EXIT: u64 = 23;
}

const DEFAULT_BINDINGS: &[(&str, u64)] = &[
    ("ls", verb::LS),
    ("cd", verb::CD),
    ("up", verb::UP),
    ("..", verb::UP),
    ("pwd", verb::PWD),
    ("mkdir", verb::MKDIR),
    ("touch", verb::TOUCH),
    ("rm", verb::RM),
    ("rmdir", verb::RMDIR),
    ("mv", verb::MV),
    ("write", verb::WRITE),
    ("cat", verb::CAT),
    ("tree", verb::TREE),
    ("find", verb::FIND),
    ("ctime", verb::CTIME),
    ("mtime", verb::MTIME),
    ("kind", verb::KIND),
    ("branch", verb::BRANCH),
    ("switch", verb::SWITCH),
    ("versions", verb::VERSIONS),
    ("alias", verb::ALIAS),
    ("unalias", verb::UNALIAS),
    ("help", verb::HELP),
    ("exit", verb::EXIT),
    ("quit", verb::EXIT),
];

const HELP_TEXT: &str = "\
ls                        list the current directory
cd NAME                   enter a directory        up | ..   go up one level
pwd                       print the current path
mkdir NAME                create a directory       touch NAME  create a file
rm NAME                   remove a file            rmdir NAME  remove a directory
mv FROM TO                rename a file or directory
write NAME TEXT...        replace a file's content (\\s escapes a space)
cat NAME                  print a file's content
tree                      render the current version
find NEEDLE               search names in the current version
ctime NAME | mtime NAME   creation / modification time
kind NAME                 file or directory
branch [INFO...]          fork the current version and switch to it
switch ID                 switch to a version      versions  list versions
alias NEW EXISTING        add a verb alias         unalias NAME
help                      this text                exit | quit";

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error ({}): {}", err.kind(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> VfsResult<()> {
    let mut options = SaverOptions::in_dir(&cli.data_dir);
    options.wal_enabled = !cli.no_wal;
    options.auto_compact_threshold = cli.wal_threshold;

    let mut fs = FileSystem::open(options)?;
    let mut registry = CommandRegistry::new();
    if registry.load(fs.saver()).is_err() || registry.is_first_start() {
        registry.clear();
        for &(identifier, verb_id) in DEFAULT_BINDINGS {
            registry.add_identifier(identifier, verb_id)?;
        }
    }

    if let Some(line) = cli.command {
        dispatch(&mut fs, &mut registry, &line);
    } else {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("{}> ", fs.current_version());
            io::stdout().flush()?;
            let Some(line) = lines.next() else { break };
            let line = line?;
            if !dispatch(&mut fs, &mut registry, &line) {
                break;
            }
        }
        println!();
    }

    registry.save(fs.saver_mut())?;
    fs.close()
}

/// Execute one line; returns false when the session should end.
fn dispatch(fs: &mut FileSystem, registry: &mut CommandRegistry, line: &str) -> bool {
    let command = registry.parse_line(line);
    let outcome = match command {
        Command::Empty => Ok(()),
        Command::Unknown(head) => {
            println!("command not found: {}", head);
            Ok(())
        }
        Command::Verb(verb::EXIT, _) => return false,
        Command::Verb(verb_id, args) => execute(fs, registry, verb_id, &args),
    };
    match outcome {
        Ok(()) => true,
        Err(err) => {
            println!("error ({}): {}", err.kind(), err);
            true
        }
    }
}

fn execute(
    fs: &mut FileSystem,
    registry: &mut CommandRegistry,
    verb_id: u64,
    args: &[String],
) -> VfsResult<()> {
    match verb_id {
        verb::LS => {
            for name in fs.ls()? {
                println!("{}", name);
            }
        }
        verb::CD => fs.chdir(arg(args, 0, "cd NAME")?)?,
        verb::UP => fs.to_parent()?,
        verb::PWD => println!("{}", fs.pwd()?),
        verb::MKDIR => fs.mkdir(arg(args, 0, "mkdir NAME")?)?,
        verb::TOUCH => fs.make_file(arg(args, 0, "touch NAME")?)?,
        verb::RM => fs.rm(arg(args, 0, "rm NAME")?)?,
        verb::RMDIR => fs.rmdir(arg(args, 0, "rmdir NAME")?)?,
        verb::MV => fs.rename(arg(args, 0, "mv FROM TO")?, arg(args, 1, "mv FROM TO")?)?,
        verb::WRITE => {
            let name = arg(args, 0, "write NAME TEXT...")?;
            let content = args[1..].join(" ");
            fs.update_content(name, &content)?;
        }
        verb::CAT => println!("{}", fs.get_content(arg(args, 0, "cat NAME")?)?),
        verb::TREE => print!("{}", fs.tree_text()?),
        verb::FIND => {
            for (name, path) in fs.find(arg(args, 0, "find NEEDLE")?)? {
                println!("{}  /{}", name, path[1..].join("/"));
            }
        }
        verb::CTIME => println!("{}", fs.get_ctime(arg(args, 0, "ctime NAME")?)?),
        verb::MTIME => println!("{}", fs.get_mtime(arg(args, 0, "mtime NAME")?)?),
        verb::KIND => {
            let kind = fs.get_kind(arg(args, 0, "kind NAME")?)?;
            println!("{}", kind.as_str());
        }
        verb::BRANCH => {
            let info = args.join(" ");
            let id = fs.branch(&info)?;
            println!("created and switched to version {}", id);
        }
        verb::SWITCH => {
            let id = parse_version_id(arg(args, 0, "switch ID")?)?;
            fs.switch_version(id)?;
        }
        verb::VERSIONS => {
            for summary in fs.versions() {
                let marker = if summary.id == fs.current_version() {
                    "*"
                } else {
                    " "
                };
                println!("{} {}  {}", marker, summary.id, summary.info);
            }
        }
        verb::ALIAS => {
            let new = arg(args, 0, "alias NEW EXISTING")?;
            let existing = arg(args, 1, "alias NEW EXISTING")?;
            let target = registry.resolve(existing).ok_or_else(|| {
                branchfs::VfsError::NotFound(existing.to_string())
            })?;
            registry.add_identifier(new, target)?;
        }
        verb::UNALIAS => registry.remove_identifier(arg(args, 0, "unalias NAME")?)?,
        verb::HELP => println!("{}", HELP_TEXT),
        _ => println!("unbound verb id {}", verb_id),
    }
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> VfsResult<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        branchfs::VfsError::NotFound(format!("missing argument (usage: {})", usage))
    })
}

fn parse_version_id(token: &str) -> VfsResult<u64> {
    token
        .parse::<u64>()
        .map_err(|_| branchfs::VfsError::NotFound(format!("version id {:?}", token)))
}
