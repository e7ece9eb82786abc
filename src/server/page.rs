pub(super) const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Food Story Video</title>
<style>
  body { font-family: sans-serif; max-width: 56rem; margin: 2rem auto; padding: 0 1rem; }
  form { display: flex; gap: .5rem; margin-bottom: 1.5rem; }
  input[type=text] { flex: 1; padding: .4rem; }
  table { width: 100%; border-collapse: collapse; }
  th, td { text-align: left; padding: .3rem .5rem; border-bottom: 1px solid #ddd; }
  .failed { color: #b00; }
  .completed { color: #070; }
</style>
</head>
<body>
<h1>Food Story Video</h1>
<form id="submit">
  <input type="text" id="topic" placeholder="Topic, e.g. ramen" required>
  <select id="mode">
    <option value="food">food</option>
    <option value="comedy">comedy</option>
  </select>
  <button type="submit">Generate</button>
</form>
<p id="message"></p>
<table>
  <thead><tr><th>Topic</th><th>Mode</th><th>Status</th><th>Stage</th><th>Created</th><th></th></tr></thead>
  <tbody id="jobs"></tbody>
</table>
<script>
const jobs = document.getElementById('jobs');
const message = document.getElementById('message');

function cell(text) {
  const td = document.createElement('td');
  td.textContent = text ?? '';
  return td;
}

async function refresh() {
  const response = await fetch('/api/jobs');
  if (!response.ok) return;
  const list = await response.json();
  jobs.replaceChildren(...list.map(job => {
    const tr = document.createElement('tr');
    tr.append(cell(job.topic), cell(job.mode), cell(job.status), cell(job.stage),
              cell(new Date(job.created_at).toLocaleString()));
    tr.className = job.status;
    const last = document.createElement('td');
    if (job.status === 'completed') {
      const a = document.createElement('a');
      a.href = `/api/jobs/${job.id}/video`;
      a.textContent = 'video';
      last.append(a);
    } else if (job.status === 'failed') {
      last.textContent = job.error;
    }
    tr.append(last);
    return tr;
  }));
}

document.getElementById('submit').addEventListener('submit', async event => {
  event.preventDefault();
  const topic = document.getElementById('topic').value;
  const mode = document.getElementById('mode').value;
  const response = await fetch('/api/jobs', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify({topic, mode}),
  });
  const body = await response.json();
  message.textContent = response.ok ? `Queued ${body.id}` : body.error;
  refresh();
});

refresh();
setInterval(refresh, 3000);
</script>
</body>
</html>
"#;
