use crate::catalog::{embed_url, Catalog};
use crate::credentials::Policy;
use crate::database::{RatingDb, UserDb};
use crate::error::AppError;
use crate::export;
use crate::session::{Flash, Screen, SessionState, SCORE_RANGE, YEARS_RANGE};
use actix_identity::Identity;
use actix_session::Session;
use actix_web::{http::header, web, HttpMessage, HttpRequest, HttpResponse};
use serde::Deserialize;

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Videos = web::Data<Catalog>;
type Accounts = web::Data<Policy>;

const STATE_KEY: &str = "state";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/register", web::get().to(register))
        .route("/register", web::post().to(register_post))
        .route("/profile", web::post().to(profile_post))
        .route("/rate", web::post().to(rate_post))
        .route("/logout", web::post().to(logout))
        .route("/admin/store.bin", web::get().to(download_store))
        .route("/admin/ratings.csv", web::get().to(download_ratings))
        .route("/admin/users.csv", web::get().to(download_users));
}

fn identity_name(identity: Option<&Identity>) -> Option<String> {
    identity.and_then(|id| id.id().ok())
}

/// Reads the state out of the session cookie. A state claiming a user that
/// the identity cookie does not vouch for is thrown away.
fn load(session: &Session, identity: Option<&Identity>) -> SessionState {
    let state = match session.get::<SessionState>(STATE_KEY) {
        Ok(state) => state.unwrap_or_default(),
        Err(err) => {
            log::warn!("Discarding unreadable session state: {}", err);
            SessionState::default()
        }
    };
    match state.username() {
        Some(username) if identity_name(identity).as_deref() != Some(username) => {
            log::debug!("Session for {} has no matching identity", username);
            SessionState::default()
        }
        _ => state,
    }
}

fn save(session: &Session, state: &SessionState) -> Result<(), AppError> {
    session.insert(STATE_KEY, state)?;
    Ok(())
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, location))
        .finish()
}

/// Marks the request as logged in once the state machine says so.
fn remember(req: &HttpRequest, state: &SessionState) -> Result<(), AppError> {
    if let Some(username) = state.username() {
        Identity::login(&req.extensions(), username.to_owned())?;
    }
    Ok(())
}

fn require_admin(db: &sled::Db, identity: Option<&Identity>) -> Result<String, AppError> {
    let username = identity_name(identity).ok_or(AppError::Forbidden)?;
    match db.get_user(&username)? {
        Some(user) if user.is_admin() => Ok(username),
        _ => {
            log::warn!("{} tried to use the admin panel", username);
            Err(AppError::Forbidden)
        }
    }
}

fn render(
    tera: &tera::Tera,
    db: &sled::Db,
    state: &SessionState,
    flash: Option<Flash>,
) -> Result<String, AppError> {
    let mut ctx = tera::Context::new();
    ctx.insert("screen", &state.screen);
    ctx.insert("flash", &flash);
    ctx.insert("years_min", YEARS_RANGE.start());
    ctx.insert("years_max", YEARS_RANGE.end());
    ctx.insert("score_min", SCORE_RANGE.start());
    ctx.insert("score_max", SCORE_RANGE.end());

    let mut admin = false;
    let mut embed = String::new();
    let mut complete = false;
    if let Screen::Rating(rating) = &state.screen {
        complete = rating.is_complete();
        if let Some(video) = &rating.current {
            embed = embed_url(video);
        }
        admin = rating.admin && db.get_user(&rating.username)?.map_or(false, |u| u.is_admin());
    }
    let (ratings, users) = if admin {
        (db.all_ratings()?, export::user_rows(db)?)
    } else {
        (Vec::new(), Vec::new())
    };
    ctx.insert("complete", &complete);
    ctx.insert("embed_url", &embed);
    ctx.insert("admin", &admin);
    ctx.insert("ratings", &ratings);
    ctx.insert("users", &users);
    Ok(tera.render("index.html", &ctx)?)
}

async fn index(
    session: Session,
    identity: Option<Identity>,
    tera: Tera,
    db: Db,
) -> Result<HttpResponse, AppError> {
    let mut state = load(&session, identity.as_ref()).present();
    let flash = state.take_flash();
    save(&session, &state)?;
    let body = render(&tera, &db, &state, flash)?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body))
}

async fn login(session: Session, identity: Option<Identity>) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref()).show_login();
    save(&session, &state)?;
    Ok(redirect("/"))
}

async fn register(session: Session, identity: Option<Identity>) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref()).show_register();
    save(&session, &state)?;
    Ok(redirect("/"))
}

#[derive(Deserialize)]
struct LoginParams {
    username: String,
    password: String,
}

async fn login_post(
    req: HttpRequest,
    params: web::Form<LoginParams>,
    session: Session,
    identity: Option<Identity>,
    db: Db,
    catalog: Videos,
) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref());
    let LoginParams { username, password } = params.into_inner();
    // bcrypt is slow on purpose, keep it off the worker thread.
    let state = web::block(move || {
        state.login(
            db.get_ref(),
            &catalog,
            &mut rand::thread_rng(),
            &username,
            &password,
        )
    })
    .await??;
    remember(&req, &state)?;
    save(&session, &state)?;
    Ok(redirect("/"))
}

#[derive(Deserialize)]
struct RegisterParams {
    username: String,
    password: String,
    years: String,
}

async fn register_post(
    params: web::Form<RegisterParams>,
    session: Session,
    identity: Option<Identity>,
    db: Db,
    accounts: Accounts,
) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref());
    let RegisterParams {
        username,
        password,
        years,
    } = params.into_inner();
    let state = web::block(move || {
        state.register(db.get_ref(), &accounts, &username, &password, &years)
    })
    .await??;
    save(&session, &state)?;
    Ok(redirect("/"))
}

#[derive(Deserialize)]
struct ProfileParams {
    years: String,
}

async fn profile_post(
    req: HttpRequest,
    params: web::Form<ProfileParams>,
    session: Session,
    identity: Option<Identity>,
    db: Db,
    catalog: Videos,
) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref()).submit_profile(
        db.get_ref(),
        &catalog,
        &mut rand::thread_rng(),
        &params.years,
    )?;
    remember(&req, &state)?;
    save(&session, &state)?;
    Ok(redirect("/"))
}

#[derive(Deserialize)]
struct RateParams {
    video: String,
    rating: String,
}

async fn rate_post(
    params: web::Form<RateParams>,
    session: Session,
    identity: Option<Identity>,
    db: Db,
    catalog: Videos,
) -> Result<HttpResponse, AppError> {
    let state = load(&session, identity.as_ref()).rate(
        db.get_ref(),
        &catalog,
        &params.video,
        &params.rating,
    )?;
    save(&session, &state)?;
    Ok(redirect("/"))
}

async fn logout(session: Session, identity: Option<Identity>) -> HttpResponse {
    load(&session, identity.as_ref()).logout();
    match identity {
        Some(identity) => identity.logout(),
        None => session.purge(),
    }
    redirect("/")
}

fn attachment(content_type: &str, filename: &str, body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(content_type)
        .append_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(body)
}

async fn download_store(identity: Option<Identity>, db: Db) -> Result<HttpResponse, AppError> {
    let admin = require_admin(&db, identity.as_ref())?;
    log::info!("{} downloaded the database", admin);
    Ok(attachment(
        "application/octet-stream",
        "vidrate-store.bin",
        export::dump(&db)?,
    ))
}

async fn download_ratings(identity: Option<Identity>, db: Db) -> Result<HttpResponse, AppError> {
    let admin = require_admin(&db, identity.as_ref())?;
    log::info!("{} downloaded the ratings", admin);
    Ok(attachment(
        "text/csv; charset=utf-8",
        "video_ratings.csv",
        export::all_ratings_csv(db.get_ref())?,
    ))
}

async fn download_users(identity: Option<Identity>, db: Db) -> Result<HttpResponse, AppError> {
    let admin = require_admin(&db, identity.as_ref())?;
    log::info!("{} downloaded the user list", admin);
    Ok(attachment(
        "text/csv; charset=utf-8",
        "user_info.csv",
        export::all_users_csv(db.get_ref())?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VIDEOS;
    use crate::credentials::{self, test_policy};
    use crate::database::temporary;
    use crate::model::{Role, User};
    use actix_identity::IdentityMiddleware;
    use actix_session::{storage::CookieSessionStore, SessionMiddleware};
    use actix_web::{
        cookie::{Cookie, Key},
        dev::ServiceResponse,
        http::StatusCode,
        test, App,
    };

    macro_rules! app {
        ($db:expr) => {
            test::init_service(
                App::new()
                    .wrap(IdentityMiddleware::default())
                    .wrap(
                        SessionMiddleware::builder(CookieSessionStore::default(), Key::generate())
                            .cookie_secure(false)
                            .build(),
                    )
                    .app_data(web::Data::new(crate::templates().unwrap()))
                    .app_data(web::Data::new($db.clone()))
                    .app_data(web::Data::new(Catalog::default()))
                    .app_data(web::Data::new(test_policy()))
                    .configure(configure),
            )
            .await
        };
    }

    macro_rules! send {
        ($app:expr, $browser:expr, $req:expr) => {{
            let mut req = $req;
            if let Some(cookie) = $browser.cookie.clone() {
                req = req.cookie(cookie);
            }
            let resp = test::call_service(&$app, req.to_request()).await;
            $browser.update(&resp);
            resp
        }};
    }

    macro_rules! page {
        ($app:expr, $browser:expr) => {{
            let resp = send!($app, $browser, test::TestRequest::get().uri("/"));
            assert_eq!(resp.status(), StatusCode::OK);
            String::from_utf8(test::read_body(resp).await.to_vec()).unwrap()
        }};
    }

    /// Carries the session cookie from one request to the next.
    #[derive(Default)]
    struct Browser {
        cookie: Option<Cookie<'static>>,
    }

    impl Browser {
        fn update<B>(&mut self, resp: &ServiceResponse<B>) {
            if let Some(cookie) = resp.response().cookies().find(|c| c.name() == "id") {
                self.cookie = if cookie.value().is_empty() {
                    None
                } else {
                    Some(cookie.into_owned())
                };
            }
        }
    }

    fn post(uri: &str, form: &[(&str, &str)]) -> test::TestRequest {
        test::TestRequest::post().uri(uri).set_form(form)
    }

    fn add_user(db: &sled::Db, username: &str, years: u32) {
        credentials::register(db, &test_policy(), username, "pw", years).unwrap();
    }

    #[actix_rt::test]
    async fn register_login_and_rate_everything() {
        let db = temporary();
        let app = app!(db);
        let mut browser = Browser::default();

        send!(app, browser, test::TestRequest::get().uri("/register"));
        let resp = send!(
            app,
            browser,
            post("/register", &[("username", "alice"), ("password", "pw"), ("years", "2")])
        );
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert!(page!(app, browser).contains("Account created. Go to Login."));
        assert!(!page!(app, browser).contains("Account created"));

        send!(app, browser, test::TestRequest::get().uri("/login"));
        send!(app, browser, post("/login", &[("username", "alice"), ("password", "pw")]));
        let body = page!(app, browser);
        assert!(body.contains("Welcome alice!"));
        assert!(body.contains("Logged in as: alice"));
        assert!(body.contains("<iframe"));
        assert!(!body.contains("Admin Panel"));

        for round in 1..=3 {
            for &video in VIDEOS {
                send!(app, browser, post("/rate", &[("video", video), ("rating", "4")]));
            }
            let unrated = Catalog::default().unrated_videos_for(&db, "alice").unwrap();
            assert_eq!(unrated.len(), 3 - round);
            let body = page!(app, browser);
            assert_eq!(body.contains("rated all available videos"), round == 3);
        }
        let ratings = db.all_ratings().unwrap();
        assert_eq!(ratings.len(), 3);
        assert!(ratings.iter().all(|r| r.username == "alice" && r.rating == 4));
    }

    #[actix_rt::test]
    async fn wrong_password_stays_on_login() {
        let db = temporary();
        add_user(&db, "bob", 1);
        let app = app!(db);
        let mut browser = Browser::default();

        send!(app, browser, test::TestRequest::get().uri("/login"));
        send!(app, browser, post("/login", &[("username", "bob"), ("password", "px")]));
        let body = page!(app, browser);
        assert!(body.contains("Invalid username or password"));
        assert!(body.contains("Login Now"));
        assert!(!body.contains("Logged in as"));
    }

    #[actix_rt::test]
    async fn legacy_account_is_asked_for_years() {
        let db = temporary();
        db.add_user(&User {
            username: "old".to_owned(),
            password_hash: bcrypt::hash("pw", 4).unwrap(),
            years_of_experience: None,
            role: Role::Member,
        })
        .unwrap();
        let app = app!(db);
        let mut browser = Browser::default();

        send!(app, browser, post("/login", &[("username", "old"), ("password", "pw")]));
        assert!(page!(app, browser).contains("Additional Info Required"));

        send!(app, browser, post("/rate", &[("video", VIDEOS[0]), ("rating", "5")]));
        assert!(db.all_ratings().unwrap().is_empty());

        send!(app, browser, post("/profile", &[("years", "7")]));
        assert!(page!(app, browser).contains("Logged in as: old"));
        assert_eq!(db.get_profile_years("old").unwrap(), Some(7));
    }

    #[actix_rt::test]
    async fn profile_screen_offers_a_way_back_to_login() {
        let db = temporary();
        db.add_user(&User {
            username: "old".to_owned(),
            password_hash: bcrypt::hash("pw", 4).unwrap(),
            years_of_experience: None,
            role: Role::Member,
        })
        .unwrap();
        add_user(&db, "fresh", 4);
        let app = app!(db);
        let mut browser = Browser::default();

        send!(app, browser, post("/login", &[("username", "old"), ("password", "pw")]));
        let body = page!(app, browser);
        assert!(body.contains("Additional Info Required"));
        assert!(body.contains("href=\"/login\""));

        send!(app, browser, test::TestRequest::get().uri("/login"));
        let body = page!(app, browser);
        assert!(body.contains("Login Now"));
        assert!(!body.contains("Additional Info Required"));

        send!(app, browser, post("/login", &[("username", "fresh"), ("password", "pw")]));
        assert!(page!(app, browser).contains("Logged in as: fresh"));
        send!(app, browser, post("/logout", &[]));

        send!(app, browser, post("/login", &[("username", "old"), ("password", "pw")]));
        assert!(page!(app, browser).contains("Additional Info Required"));
        assert_eq!(db.get_profile_years("old").unwrap(), None);
    }

    #[actix_rt::test]
    async fn logout_forgets_the_user() {
        let db = temporary();
        add_user(&db, "carol", 3);
        let app = app!(db);
        let mut browser = Browser::default();

        send!(app, browser, post("/login", &[("username", "carol"), ("password", "pw")]));
        assert!(page!(app, browser).contains("Logged in as: carol"));

        send!(app, browser, post("/logout", &[]));
        for &video in VIDEOS {
            send!(app, browser, post("/rate", &[("video", video), ("rating", "2")]));
        }
        let body = page!(app, browser);
        assert!(!body.contains("Logged in as"));
        assert!(body.contains("href=\"/register\""));
        assert!(db.all_ratings().unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn admin_downloads_require_admin_role() {
        let db = temporary();
        add_user(&db, "admin", 10);
        add_user(&db, "dave", 1);
        db.upsert_rating("dave", VIDEOS[0], 5).unwrap();
        let app = app!(db);

        let mut anonymous = Browser::default();
        for uri in ["/admin/users.csv", "/admin/ratings.csv", "/admin/store.bin"] {
            let resp = send!(app, anonymous, test::TestRequest::get().uri(uri));
            assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        }

        let mut dave = Browser::default();
        send!(app, dave, post("/login", &[("username", "dave"), ("password", "pw")]));
        let resp = send!(app, dave, test::TestRequest::get().uri("/admin/users.csv"));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let mut admin = Browser::default();
        send!(app, admin, post("/login", &[("username", "admin"), ("password", "pw")]));
        let body = page!(app, admin);
        assert!(body.contains("Admin Panel"));
        assert!(body.contains("Download ratings as CSV"));

        let resp = send!(app, admin, test::TestRequest::get().uri("/admin/users.csv"));
        assert_eq!(resp.status(), StatusCode::OK);
        let csv = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(csv.starts_with("username,years_of_experience\n"));
        assert!(csv.contains("dave,1"));
        assert!(!csv.contains("password_hash"));
        assert!(!csv.contains("$2"));

        let resp = send!(app, admin, test::TestRequest::get().uri("/admin/ratings.csv"));
        assert_eq!(resp.status(), StatusCode::OK);
        let csv = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(csv.contains(&format!("dave,{},5", VIDEOS[0])));

        let resp = send!(app, admin, test::TestRequest::get().uri("/admin/store.bin"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!test::read_body(resp).await.is_empty());
    }

    #[actix_rt::test]
    async fn admin_panel_reports_missing_ratings() {
        let db = temporary();
        add_user(&db, "admin", 10);
        let app = app!(db);
        let mut admin = Browser::default();

        send!(app, admin, post("/login", &[("username", "admin"), ("password", "pw")]));
        let body = page!(app, admin);
        assert!(body.contains("No ratings found yet."));
        assert!(!body.contains("Download ratings as CSV"));
    }
}
