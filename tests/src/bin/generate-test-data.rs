use chrono::{DateTime, Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 5;
const PASSWORD: &str = "password";

const NUM_POSTS: usize = 20;
const POST_PARAGRAPH_COUNT: usize = 4;
const POST_PARAGRAPH_LEN: usize = 60;

const NUM_LIKES: usize = 40;

const COMMENTS_PER_POST: usize = 30;
const COMMENT_LEN: usize = 25;
// chance for a comment to answer an earlier one rather than the post
const REPLY_PROBABILITY: f64 = 0.7;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn gen_date(rng: &mut impl Rng) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(rng.gen_range(0..60 * 24 * 365))
}

fn gen_post_content() -> String {
    (0..POST_PARAGRAPH_COUNT)
        .map(|_| format!("<p>{}</p>", lipsum::lipsum_words(POST_PARAGRAPH_LEN)))
        .collect()
}

fn main() {
    let mut rng = rand::thread_rng();

    // Generate users, all with the same password
    let hash = bcrypt::hash(PASSWORD, bcrypt::DEFAULT_COST).expect("hashing test password");
    let mut users = Vec::new();
    println!("-- every user has password {:?}", PASSWORD);
    gen_n_items("users", NUM_USERS, |i| {
        let uuid = Uuid::new_v4();
        users.push(uuid);
        format!(
            "('{}', {}, {}, {})",
            uuid,
            quote(&format!("user{i}")),
            quote(&format!("user{i}@example.org")),
            quote(&hash),
        )
    });

    // Generate posts
    let mut posts = Vec::new();
    gen_n_items(
        "posts (id, author_id, title, content, created_at, updated_at)",
        NUM_POSTS,
        |_| {
            let uuid = Uuid::new_v4();
            let date = gen_date(&mut rng);
            posts.push((uuid, date));
            format!(
                "('{}', '{}', {}, {}, '{}', '{}')",
                uuid,
                users.choose(&mut rng).expect("no users"),
                quote(&lipsum::lipsum_title()),
                quote(&gen_post_content()),
                date.to_rfc3339(),
                date.to_rfc3339(),
            )
        },
    );

    // Generate likes, duplicates being ignored by ON CONFLICT
    gen_n_items("likes", NUM_LIKES, |_| {
        format!(
            "('{}', '{}')",
            users.choose(&mut rng).expect("no users"),
            posts.choose(&mut rng).expect("no posts").0,
        )
    });

    // Generate comment threads, parents always before their replies
    for (post, post_date) in posts.iter() {
        let mut comments: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
        gen_n_items(
            "comments (id, post_id, author_id, parent_id, text, created_at)",
            COMMENTS_PER_POST,
            |_| {
                let uuid = Uuid::new_v4();
                let parent = match comments.is_empty() || !rng.gen_bool(REPLY_PROBABILITY) {
                    true => None,
                    false => comments.choose(&mut rng).copied(),
                };
                let after = parent.map(|(_, d)| d).unwrap_or(*post_date);
                let date = after + Duration::minutes(rng.gen_range(1..60 * 24));
                comments.push((uuid, date));
                format!(
                    "('{}', '{}', '{}', {}, {}, '{}')",
                    uuid,
                    post,
                    users.choose(&mut rng).expect("no users"),
                    match parent {
                        Some((p, _)) => format!("'{p}'"),
                        None => String::from("NULL"),
                    },
                    quote(&lipsum::lipsum_words(COMMENT_LEN)),
                    date.to_rfc3339(),
                )
            },
        );
    }
}
