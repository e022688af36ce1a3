//! Prompt templates sent to the language model.

use crate::{fetch::PageContent, topic::Topic};

/// Page text beyond this many characters is not sent for summarisation.
pub const PAGE_TEXT_LIMIT: usize = 2000;

pub struct DecidePrompt<'a> {
    pub topic: &'a Topic,
    pub current_date: &'a str,
    pub language: &'a str,
    pub links: usize,
    pub soft_link_threshold: usize,
    pub context: &'a str,
}

impl DecidePrompt<'_> {
    pub fn render(&self) -> String {
        let context = if self.context.trim().is_empty() {
            "No previous searches."
        } else {
            self.context
        };
        format!(
            r#"You are a research assistant who can search the web to explain trending news topics.
Given a trending keyword, research it in depth using the dimensions below and your previous findings.
Answer in {language}.

### Research dimensions (highest priority first)
- Basic facts: the concrete event, time, place and people behind the keyword
- Timeline: causes, key turning points, latest developments
- Impact: who is affected, regions, industries
- Controversy: where opinions diverge and why
- Official response: statements from authorities or the people involved
- Related events: historical or parallel stories

Not every dimension has to be covered.

## Context
- Current time: {date}
- Trending keyword: {topic}
- {metrics}
- Related news headlines:

{news}

- Previous research, {links} link(s) in total:

{context}

## Actions
[1] search
  Look up more information on the web.
  Parameters:
    - search_query (str): what to search for

[2] answer
  Answer with the current knowledge.
  Parameters:
    - answer (str): the final answer

### Next action
Decide the next action from the context, the research dimensions and the available actions.
IMPORTANT: once previous research holds more than {threshold} links, answer using what you have instead of searching again.

Reply in this format:

```yaml
thinking: |
    <step-by-step reasoning>
action: search OR answer
reason: <why this action>
answer: |
    <the answer, if action is answer>
search_query: |
    <the search query, if action is search>
```
Rules:
1. Use | for multi-line fields, indented by 4 spaces.
2. Do not use | for single-line fields.
3. Never nest a key directly after another key.
4. Do not use colons outside of key/value pairs.
"#,
            language = self.language,
            date = self.current_date,
            topic = self.topic.name,
            metrics = self.topic.describe_metrics(),
            news = bullet_list(&self.topic.related_news_titles),
            links = self.links,
            context = context,
            threshold = self.soft_link_threshold,
        )
    }
}

pub struct SynthesisPrompt<'a> {
    pub topic: &'a Topic,
    pub current_date: &'a str,
    pub language: &'a str,
    pub primary_language: &'a str,
    pub context: &'a str,
}

impl SynthesisPrompt<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"## Context

You condense research about a trending topic into a narrative.

### Dimensions
- Core facts: the key elements among all the material
- Public sentiment: how opinion and discussion shifted over time
- Catalysts: the moments that made the topic spread
- Outlook: where the topic is likely heading

### Input
Current time: {date}
Trending keyword: {topic}
{metrics}

Research:

{context}

### Your answer
1. Write two narratives from the research:
   - a {primary} narrative (`primary`)
   - a {language} narrative (`narrative`)
   Use everyday language without jargon, cover the dimensions above and keep each narrative clearly structured.
2. Pick the 2 most relevant reports from the research as highlights.

```yaml
highlights:
  - title: <report title in {language}>
    summary: <summary in {language}>
    link: "<source link, always quoted>"
  - title: <report title in {language}>
    summary: <summary in {language}>
    link: "<source link, always quoted>"
primary: |
    <{primary} narrative>
narrative: |
    <{language} narrative>
```

YAML rules:
- Every key is followed by an ASCII colon and one space.
- Multi-line fields use | and are indented 4 spaces deeper than the key.
- Do not nest structures under title, summary or link.
- Do not add structure inside primary or narrative.
"#,
            date = self.current_date,
            topic = self.topic.name,
            metrics = self.topic.describe_metrics(),
            context = self.context,
            primary = self.primary_language,
            language = self.language,
        )
    }
}

pub fn page_analysis_prompt(page: &PageContent, language: &str) -> String {
    let text: String = page.text.chars().take(PAGE_TEXT_LIMIT).collect();
    format!(
        r#"Analyse the following web page. Answer in {language}.

Title: {title}
Link: {url}
Content: {text}

Provide:
1. A short title for the page
2. A brief summary (2-3 sentences)
3. Up to 5 topics or keywords
4. The content type (article, product page, video, ...)

```yaml
title: <title>
summary: >
    <summary>
topics:
    - <topic 1>
    - <topic 2>
content_type: <content type>
```
"#,
        title = page.title,
        url = page.url,
    )
}

pub fn rewrite_prompt(style: &str, narrative: &str, language: &str) -> String {
    format!(
        r#"## Requirements:
{style}

## Narrative of the trending topic:
{narrative}

## Output format:

speaker name : what the speaker says

## Make sure that:
- the dialogue is written in {language}
- each line holds only the speaker name and the spoken words
- no character introductions or other unrelated text are included
- speakers are separated by line breaks
- only plain text and basic punctuation (! ? . ,) are used
- no tone descriptions such as pauses, sighs or surprise are included
- no narration such as "calmly" or "laughing" is included
"#
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
