//! Batch selection and the extraction query.

use crate::config::RunState;

/// Select statements yielding a `video_id` column, one per batch.
///
/// Staged run-state files take precedence over explicit ids. Returns an empty
/// list when there is nothing to process.
pub fn batch_selects(state: &RunState, videos: &[String]) -> Vec<String> {
    if let Some(paths) = state.video_paths.as_ref().filter(|p| !p.is_empty()) {
        return paths
            .iter()
            .map(|path| format!("select $1:video_id::string video_id from @public.yt_data/{}", path))
            .collect();
    }

    if videos.is_empty() {
        return Vec::new();
    }

    let ids = videos
        .iter()
        .map(|id| quote(id))
        .collect::<Vec<_>>()
        .join(",");
    vec![format!("select video_id from video_latest where video_id in ({})", ids)]
}

/// SQL string literal for `value`.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Videos named by `select`, joined with their latest metadata and the
/// ordered array of their captions.
pub fn video_entities_sql(select: &str) -> String {
    format!(
        r#"
with
load as ({select})
, vids as (
select v.video_id, v.video_title, v.description, v.updated
from load l
join video_latest v on v.video_id = l.video_id
order by video_id
)
, s as (
select v.video_id
    , any_value(video_title) video_title
    , any_value(description) description
    , array_agg(object_construct('offset',s.offset_seconds::int,'caption',s.caption)) within group ( order by offset_seconds ) captions
    , max(v.updated) video_updated
    , max(s.updated) caption_updated
from vids v
    left join caption s on v.video_id=s.video_id
    group by v.video_id
)
select * from s
"#
    )
}
