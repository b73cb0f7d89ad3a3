use canopy_core::{GlobalContext, TreeNode, TreeUpdateMode, tree};
use canopy_view::{View, ViewConfig};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Render {
        file: PathBuf,
        global: Option<String>,
        config: Option<PathBuf>,
    },
    Dispatch {
        file: PathBuf,
        node: String,
        event: String,
        payload: Option<String>,
        global: Option<String>,
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct Painting {
    tree: TreeNode,
    anchor: Option<String>,
    mode: TreeUpdateMode,
}

impl Painting {
    fn to_value(&self) -> Value {
        json!({
            "anchor": self.anchor,
            "mode": self.mode,
            "tree": self.tree.to_value(),
        })
    }
}

/// A view whose paint callback records every painted scope.
struct Session {
    view: View,
    paintings: Rc<RefCell<Vec<Painting>>>,
}

impl Session {
    fn open(global: Option<String>, config: Option<&Path>) -> Result<Self, String> {
        let config = match config {
            Some(path) => ViewConfig::load(path).map_err(|e| e.to_string())?,
            None => ViewConfig::default(),
        };
        let global = load_json_payload(global, "--global")?.unwrap_or_else(|| json!({}));

        let paintings: Rc<RefCell<Vec<Painting>>> = Rc::default();
        let sink = paintings.clone();
        let view = View::builder(move |tree, anchor, mode| {
            sink.borrow_mut().push(Painting {
                tree: tree.clone(),
                anchor: anchor.map(str::to_string),
                mode,
            });
        })
        .config(config)
        .global(GlobalContext::new(global))
        .build();
        Ok(Self { view, paintings })
    }

    /// Most recently painted copy of the node `id`.
    fn painted_node(&self, id: &str) -> Option<TreeNode> {
        self.paintings
            .borrow()
            .iter()
            .rev()
            .find_map(|p| tree::find_by_id(&p.tree, id).cloned())
    }
}

pub fn run_from_env() -> Result<(), String> {
    run_from_args(env::args().skip(1).collect())
}

pub fn run_from_args(args: Vec<String>) -> Result<(), String> {
    let output = match parse_command(args)? {
        CliCommand::Render {
            file,
            global,
            config,
        } => render_file(&file, global, config.as_deref())?,
        CliCommand::Dispatch {
            file,
            node,
            event,
            payload,
            global,
            config,
        } => dispatch_file(&file, &node, &event, payload, global, config.as_deref())?,
    };
    let pretty = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{pretty}");
    Ok(())
}

fn parse_command(args: Vec<String>) -> Result<CliCommand, String> {
    if args.is_empty() {
        return Err(help_text());
    }

    let cmd = args[0].as_str();
    match cmd {
        "render" | "dispatch" => parse_render_or_dispatch(args),
        "help" | "--help" | "-h" => Err(help_text()),
        _ => Err(format!("unknown command: {cmd}\n\n{}", help_text())),
    }
}

fn flag_value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    args.get(i)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_render_or_dispatch(args: Vec<String>) -> Result<CliCommand, String> {
    let is_dispatch = args[0] == "dispatch";
    let mut file: Option<PathBuf> = None;
    let mut global: Option<String> = None;
    let mut config: Option<PathBuf> = None;
    let mut node: Option<String> = None;
    let mut event: Option<String> = None;
    let mut payload: Option<String> = None;

    let mut i = 1usize;
    while i < args.len() {
        let token = &args[i];
        match token.as_str() {
            "--global" => {
                i += 1;
                global = Some(flag_value(&args, i, "--global")?);
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(flag_value(&args, i, "--config")?));
            }
            "--node" if is_dispatch => {
                i += 1;
                node = Some(flag_value(&args, i, "--node")?);
            }
            "--event" if is_dispatch => {
                i += 1;
                event = Some(flag_value(&args, i, "--event")?);
            }
            "--payload" if is_dispatch => {
                i += 1;
                payload = Some(flag_value(&args, i, "--payload")?);
            }
            x if x.starts_with("--") => return Err(format!("unknown flag: {x}")),
            _ => {
                if file.is_some() {
                    return Err("only one FILE positional argument is allowed".to_string());
                }
                file = Some(PathBuf::from(token));
            }
        }
        i += 1;
    }

    let file = file.ok_or_else(|| format!("{} requires FILE", args[0]))?;
    if !is_dispatch {
        return Ok(CliCommand::Render {
            file,
            global,
            config,
        });
    }
    Ok(CliCommand::Dispatch {
        file,
        node: node.ok_or_else(|| "dispatch requires --node".to_string())?,
        event: event.ok_or_else(|| "dispatch requires --event".to_string())?,
        payload,
        global,
        config,
    })
}

fn help_text() -> String {
    [
        "canopy CLI",
        "",
        "Commands:",
        "  canopy render FILE [--global JSON_OR_PATH] [--config PATH]",
        "  canopy dispatch FILE --node ID --event NAME [--payload JSON_OR_PATH]",
        "                  [--global JSON_OR_PATH] [--config PATH]",
        "",
        "Logging is controlled by CANOPY_LOG (default: warn).",
    ]
    .join("\n")
}

fn read_json(file: &Path) -> Result<Value, String> {
    let source =
        fs::read_to_string(file).map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    serde_json::from_str(&source).map_err(|e| format!("failed to parse {}: {e}", file.display()))
}

fn load_tree(file: &Path) -> Result<TreeNode, String> {
    TreeNode::from_value(read_json(file)?)
        .map_err(|e| format!("invalid tree in {}: {e}", file.display()))
}

/// `--payload`/`--global` value: an existing file path wins over inline JSON.
fn load_json_payload(input: Option<String>, flag: &str) -> Result<Option<Value>, String> {
    input
        .map(|raw| {
            let as_path = Path::new(&raw);
            if as_path.is_file() {
                read_json(as_path)
            } else {
                serde_json::from_str(&raw).map_err(|e| format!("invalid {flag} JSON: {e}"))
            }
        })
        .transpose()
}

fn render_file(file: &Path, global: Option<String>, config: Option<&Path>) -> Result<Value, String> {
    let session = Session::open(global, config)?;
    session
        .view
        .render(load_tree(file)?)
        .map_err(|e| e.to_string())?;
    let paintings = session.paintings.borrow();
    paintings
        .last()
        .map(|p| p.tree.to_value())
        .ok_or_else(|| "nothing was painted".to_string())
}

fn dispatch_file(
    file: &Path,
    node: &str,
    event: &str,
    payload: Option<String>,
    global: Option<String>,
    config: Option<&Path>,
) -> Result<Value, String> {
    let session = Session::open(global, config)?;
    session
        .view
        .render(load_tree(file)?)
        .map_err(|e| e.to_string())?;
    let payload = load_json_payload(payload, "--payload")?.unwrap_or(Value::Null);

    let target = session
        .painted_node(node)
        .ok_or_else(|| format!("node not found: {node}"))?;
    let before = session.paintings.borrow().len();
    debug!(node, event, "dispatching");
    if !target.dispatch(event, &payload) {
        return Err(format!("node {node} has no {event} listener"));
    }

    let paintings = session.paintings.borrow();
    Ok(Value::Array(
        paintings[before..].iter().map(Painting::to_value).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{}-{}-{}", prefix, std::process::id(), ts));
        std::fs::create_dir_all(&dir).expect("failed to create temp dir");
        dir
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn write_tree(dir: &Path) -> PathBuf {
        let file = dir.join("screen.json");
        let tree = json!({
            "type": "screen",
            "id": "screen",
            "children": [
                {"type": "container", "id": "box",
                 "context": {"id": "counter", "value": {"n": 1}},
                 "children": [
                    {"type": "text", "text": "n=@{counter.n} as @{global.user}"},
                    {"type": "button", "id": "inc", "onPress": {
                        "_action_": "setContext", "path": "n", "value": "@{sum(counter.n, onPress)}"
                    }}
                 ]}
            ]
        });
        std::fs::write(&file, tree.to_string()).expect("failed to write tree");
        file
    }

    #[test]
    fn test_parse_dispatch_flags() {
        let command = parse_command(args(&[
            "dispatch", "s.json", "--node", "inc", "--event", "onPress", "--payload", "2",
        ]))
        .expect("dispatch should parse");
        assert_eq!(
            command,
            CliCommand::Dispatch {
                file: PathBuf::from("s.json"),
                node: "inc".into(),
                event: "onPress".into(),
                payload: Some("2".into()),
                global: None,
                config: None,
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command(vec![]).unwrap_err().contains("canopy CLI"));
        assert!(parse_command(args(&["paint"])).unwrap_err().starts_with("unknown command"));
        assert_eq!(
            parse_command(args(&["render", "a.json", "--node", "x"])).unwrap_err(),
            "unknown flag: --node"
        );
        assert_eq!(
            parse_command(args(&["render", "a.json", "b.json"])).unwrap_err(),
            "only one FILE positional argument is allowed"
        );
        assert_eq!(
            parse_command(args(&["dispatch", "a.json", "--node", "x"])).unwrap_err(),
            "dispatch requires --event"
        );
        assert_eq!(
            parse_command(args(&["render", "--global"])).unwrap_err(),
            "--global requires a value"
        );
    }

    #[test]
    fn test_json_payload_prefers_file_then_inline() {
        let dir = unique_temp_dir("canopy-payload");
        let file = dir.join("payload.json");
        std::fs::write(&file, r#"{"from": "file"}"#).expect("failed to write payload");

        assert_eq!(load_json_payload(None, "--payload"), Ok(None));
        assert_eq!(
            load_json_payload(Some(file.display().to_string()), "--payload"),
            Ok(Some(json!({"from": "file"})))
        );
        assert_eq!(
            load_json_payload(Some("[1, 2]".into()), "--payload"),
            Ok(Some(json!([1, 2])))
        );
        assert!(
            load_json_payload(Some("{oops".into()), "--global")
                .unwrap_err()
                .starts_with("invalid --global JSON")
        );

        std::fs::write(&file, "{oops").expect("failed to write payload");
        assert!(
            load_json_payload(Some(file.display().to_string()), "--payload")
                .unwrap_err()
                .starts_with("failed to parse")
        );
    }

    #[test]
    fn test_render_prints_resolved_tree() {
        let dir = unique_temp_dir("canopy-render");
        let file = write_tree(&dir);
        let out = render_file(&file, Some(r#"{"user": "ana"}"#.into()), None)
            .expect("render should succeed");
        assert_eq!(
            out["children"][0]["children"][0]["text"],
            json!("n=1 as ana")
        );
        assert_eq!(out["children"][0]["children"][0]["id"], json!("box/0:text"));
    }

    #[test]
    fn test_dispatch_prints_partial_render() {
        let dir = unique_temp_dir("canopy-dispatch");
        let file = write_tree(&dir);
        let global = dir.join("global.json");
        std::fs::write(&global, r#"{"user": "bea"}"#).expect("failed to write global");

        let out = dispatch_file(
            &file,
            "inc",
            "onPress",
            Some("5".into()),
            Some(global.display().to_string()),
            None,
        )
        .expect("dispatch should succeed");
        let paintings = out.as_array().expect("array of paintings");
        assert_eq!(paintings.len(), 1);
        assert_eq!(paintings[0]["anchor"], json!("box"));
        assert_eq!(paintings[0]["mode"], json!("replaceComponent"));
        assert_eq!(
            paintings[0]["tree"]["children"][0]["text"],
            json!("n=6 as bea")
        );
    }

    #[test]
    fn test_dispatch_errors() {
        let dir = unique_temp_dir("canopy-dispatch-err");
        let file = write_tree(&dir);
        assert_eq!(
            dispatch_file(&file, "ghost", "onPress", None, None, None).unwrap_err(),
            "node not found: ghost"
        );
        assert_eq!(
            dispatch_file(&file, "inc", "onLongPress", None, None, None).unwrap_err(),
            "node inc has no onLongPress listener"
        );
        let config = dir.join("view.json");
        std::fs::write(&config, r#"{"components": ["screen"], "strictComponents": true}"#)
            .expect("failed to write config");
        assert!(
            render_file(&file, None, Some(&config))
                .unwrap_err()
                .contains("container")
        );
    }
}
