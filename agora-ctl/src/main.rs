use std::collections::HashSet;

use agora_api::{NewReply, Question, QuestionId, RemoteStore, ReplyId, Viewer};
use agora_client::{DiscussionController, Expansion, VisibleReply};
use agora_mock_server::MockStore;
use anyhow::Context;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

const AUTHORS: &[&str] = &["alice", "carol", "dave", "erin"];

const QUESTION_BODY_WORDS: usize = 30;
const REPLY_BODY_WORDS: usize = 12;
const MAX_SEED_LIKES: usize = 3;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Seed a random discussion and walk through it
    Demo {
        /// Seed for the random discussion
        #[structopt(long, default_value = "0")]
        seed: u64,

        /// Number of replies to the question itself
        #[structopt(long, default_value = "3")]
        top_level: usize,

        /// How deep replies nest below the top level
        #[structopt(long, default_value = "2")]
        depth: usize,

        /// Number of replies to each reply
        #[structopt(long, default_value = "2")]
        fanout: usize,

        /// Display name of the person browsing the discussion
        #[structopt(long, default_value = "bob")]
        viewer: String,

        /// Print each step as JSON instead of text
        #[structopt(long)]
        json: bool,
    },
}

struct DemoShape {
    top_level: usize,
    depth: usize,
    fanout: usize,
}

fn gen_author(rng: &mut StdRng, viewer: &str) -> String {
    // the viewer writes one reply in five, so there is something to delete
    match rng.gen_ratio(1, 5) {
        true => String::from(viewer),
        false => String::from(*AUTHORS.choose(rng).unwrap_or(&"alice")),
    }
}

async fn seed_discussion(
    store: &MockStore,
    rng: &mut StdRng,
    viewer: &str,
    shape: &DemoShape,
) -> anyhow::Result<QuestionId> {
    let question = Question {
        id: QuestionId::from("q1"),
        title: format!("{}?", lipsum::lipsum_words_with_rng(&mut *rng, 6)),
        body: lipsum::lipsum_words_with_rng(&mut *rng, QUESTION_BODY_WORDS),
        author_name: gen_author(rng, viewer),
        child_age_label: format!("{} years", rng.gen_range(1..12)),
        like_count: rng.gen_range(0..10),
        reply_count: 0,
        liked_by_me: None,
        saved_by_me: None,
    };
    store.add_question(question.clone());
    let mut parents = vec![None];
    for level in 0..=shape.depth {
        let count = match level {
            0 => shape.top_level,
            _ => shape.fanout,
        };
        let mut next = Vec::new();
        for parent in parents {
            for _ in 0..count {
                let reply = store
                    .create_reply(NewReply {
                        question_id: question.id.clone(),
                        parent_id: parent.clone(),
                        body: lipsum::lipsum_words_with_rng(&mut *rng, REPLY_BODY_WORDS),
                        author_name: gen_author(rng, viewer),
                    })
                    .await
                    .context("seeding reply")?;
                let num_likes = rng.gen_range(0..=MAX_SEED_LIKES);
                for liker in AUTHORS.choose_multiple(rng, num_likes) {
                    store
                        .like_as(liker, &reply.id)
                        .context("seeding reply likes")?;
                }
                next.push(Some(reply.id));
            }
        }
        parents = next;
    }
    tracing::info!(question = %question.id, "seeded discussion");
    Ok(question.id)
}

fn marker(line: &VisibleReply) -> &'static str {
    match line.expansion {
        Expansion::Collapsed => "+",
        Expansion::Loading => "~",
        Expansion::Expanded => "-",
    }
}

fn print_step<S: RemoteStore>(
    step: &str,
    ctl: &DiscussionController<S>,
    json: bool,
) -> anyhow::Result<()> {
    let tree = ctl.visible_tree();
    if json {
        let out = serde_json::json!({
            "step": step,
            "question": ctl.question(),
            "question_liked": ctl.question_liked(),
            "saved": ctl.saved(),
            "replies": tree,
        });
        println!("{}", serde_json::to_string(&out).context("serializing step")?);
        return Ok(());
    }
    println!("== {step}");
    if let Some(q) = ctl.question() {
        println!(
            "{} [{} likes{}{}]",
            q.title,
            q.like_count,
            if ctl.question_liked() { ", liked" } else { "" },
            if ctl.saved() { ", saved" } else { "" },
        );
    }
    for line in tree {
        println!(
            "{:indent$}{} {} ({} likes{}): {}",
            "",
            marker(&line),
            line.reply.author_name,
            line.reply.like_count,
            if line.liked_by_me { ", liked" } else { "" },
            line.reply.body,
            indent = 2 * line.depth + 2,
        );
    }
    println!();
    Ok(())
}

/// Expand everything, one level at a time
async fn expand_all<S: RemoteStore>(ctl: &DiscussionController<S>) -> anyhow::Result<()> {
    let mut tried = HashSet::new();
    loop {
        let pending = ctl
            .visible_tree()
            .into_iter()
            .filter(|l| l.expansion == Expansion::Collapsed && !tried.contains(&l.reply.id))
            .map(|l| l.reply.id)
            .collect::<Vec<ReplyId>>();
        if pending.is_empty() {
            return Ok(());
        }
        for rid in pending {
            ctl.expand(&rid)
                .await
                .with_context(|| format!("expanding reply {rid}"))?;
            tried.insert(rid);
        }
    }
}

async fn demo(seed: u64, shape: DemoShape, viewer: String, json: bool) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = MockStore::new(&viewer);
    let qid = seed_discussion(&store, &mut rng, &viewer, &shape).await?;
    let ctl = DiscussionController::new(store, Viewer::new(viewer));

    ctl.load_discussion(qid).await.context("loading discussion")?;
    print_step("load", &ctl, json)?;

    expand_all(&ctl).await?;
    print_step("expand all", &ctl, json)?;

    ctl.toggle_question_like().await.context("liking question")?;
    ctl.toggle_saved().await.context("saving question")?;
    let tree = ctl.visible_tree();
    if let Some(line) = tree.choose(&mut rng) {
        ctl.toggle_reply_like(&line.reply.id)
            .await
            .with_context(|| format!("liking reply {}", line.reply.id))?;
    }
    print_step("like", &ctl, json)?;

    let deepest = tree.iter().max_by_key(|l| l.depth).map(|l| l.reply.id.clone());
    ctl.set_reply_target(deepest).context("choosing reply target")?;
    ctl.submit_reply(&lipsum::lipsum_words_with_rng(&mut rng, REPLY_BODY_WORDS))
        .await
        .context("submitting reply")?;
    print_step("reply", &ctl, json)?;

    let own = tree
        .iter()
        .find(|l| ctl.viewer().can_delete(&l.reply))
        .map(|l| l.reply.id.clone());
    match own {
        Some(rid) => {
            ctl.delete_reply(&rid)
                .await
                .with_context(|| format!("deleting reply {rid}"))?;
            print_step("delete", &ctl, json)?;
        }
        None => tracing::info!("viewer wrote no reply, skipping deletion"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    match opt.cmd {
        Command::Demo {
            seed,
            top_level,
            depth,
            fanout,
            viewer,
            json,
        } => {
            let shape = DemoShape {
                top_level,
                depth,
                fanout,
            };
            demo(seed, shape, viewer, json).await?;
        }
    }

    Ok(())
}
