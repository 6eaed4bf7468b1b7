use crate::{
    account::{
        allow_list::{load_allow_list, store_allow_list, AccessTokenEntry},
        password::{hash_password, validate_password, verify_password},
    },
    config::ServerConfig,
    credential::{CredentialCodec, Purpose, Subject},
    db::{Database, NewUser, User, UserRepository},
    error::{LinkError, LinkResult},
    mailer::EmailSender,
    verification::{
        generate_verify_code, normalize_verify_code, FlowFlag, Phase, PhaseStore, VERIFY_CODE_TTL,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives the register, login and reset-password flows
///
/// Every step re-validates the ticket signature, then checks the phase stored
/// under the ticket string before advancing it.
#[derive(Clone)]
pub struct AccountService {
    config: Arc<ServerConfig>,
    codec: Arc<CredentialCodec>,
    phases: PhaseStore,
    db: Arc<dyn Database>,
    mailer: Arc<dyn EmailSender>,
}

impl AccountService {
    pub fn new(
        config: Arc<ServerConfig>,
        codec: Arc<CredentialCodec>,
        phases: PhaseStore,
        db: Arc<dyn Database>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            codec,
            phases,
            db,
            mailer,
        }
    }

    fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.config.authentication.access_token_ttl)
    }

    /// Derive the register identity from a bare id or a campus email
    ///
    /// The identity is the lower-cased local part; an email on a foreign
    /// domain is rejected.
    pub fn register_identity(&self, username: &str) -> LinkResult<String> {
        let username = username.trim().to_lowercase();
        let local = match username.split_once('@') {
            Some((local, domain)) => {
                if domain != self.config.authentication.email_domain {
                    return Err(LinkError::InvalidInput(format!(
                        "Only @{} addresses can register",
                        self.config.authentication.email_domain
                    )));
                }
                local.to_string()
            }
            None => username,
        };

        if local.is_empty() || !local.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LinkError::InvalidInput(format!(
                "Invalid account id: {}",
                local
            )));
        }
        Ok(local)
    }

    fn campus_email(&self, identity: &str) -> String {
        format!("{}@{}", identity, self.config.authentication.email_domain)
    }

    /// Find an account by email (contains `@`) or by bare account id
    pub async fn find_user(&self, username: &str) -> LinkResult<Option<User>> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Err(LinkError::InvalidInput("Username is required".to_string()));
        }
        if username.contains('@') {
            self.db.user_by_email(&username).await
        } else {
            self.db.user_by_uid(&username).await
        }
    }

    /// Decode a flow ticket, translating credential errors into ticket errors
    fn ticket_subject(&self, ticket: &str) -> LinkResult<(Subject, FlowFlag)> {
        if ticket.is_empty() {
            return Err(LinkError::TicketNotFound);
        }
        let subject = self
            .codec
            .subject(ticket)
            .map_err(LinkError::into_ticket_error)?;
        let flag = FlowFlag::from_purpose(subject.purpose).ok_or(LinkError::TicketNotFound)?;
        Ok((subject, flag))
    }

    fn ticket_identity(&self, ticket: &str, flag: FlowFlag) -> LinkResult<String> {
        if ticket.is_empty() {
            return Err(LinkError::TicketNotFound);
        }
        self.codec
            .identity_for(ticket, flag.purpose())
            .map_err(LinkError::into_ticket_error)
    }

    /// Fail unless the stored phase is one of `allowed`
    async fn require_phase(&self, ticket: &str, allowed: &[Phase]) -> LinkResult<Phase> {
        match self.phases.phase(ticket).await? {
            None => Err(LinkError::TicketNotFound),
            Some(phase) if allowed.contains(&phase) => Ok(phase),
            Some(phase) => {
                debug!(%phase, ?allowed, "ticket in unexpected phase");
                Err(LinkError::PhaseError)
            }
        }
    }

    /// Whether `ticket` has a stored phase short of `SUCCESS`
    pub async fn ticket_is_open(&self, ticket: &str) -> LinkResult<bool> {
        if ticket.is_empty() {
            return Ok(false);
        }
        Ok(matches!(
            self.phases.phase(ticket).await?,
            Some(phase) if phase != Phase::Success
        ))
    }

    /// Check the account against the flow and issue a phase-0 ticket
    pub async fn verify_account(&self, username: &str, flag: FlowFlag) -> LinkResult<String> {
        let identity = match flag {
            FlowFlag::Register => {
                let identity = self.register_identity(username)?;
                if self.db.user_by_uid(&identity).await?.is_some()
                    || self
                        .db
                        .user_by_email(&self.campus_email(&identity))
                        .await?
                        .is_some()
                {
                    return Err(LinkError::UserExists);
                }
                identity
            }
            FlowFlag::Login | FlowFlag::ResetPassword => {
                self.find_user(username)
                    .await?
                    .ok_or(LinkError::UserNotFound)?
                    .uid
            }
        };

        let ttl = flag.ticket_ttl();
        let ticket = self.codec.issue(&identity, flag.purpose(), ttl)?;
        self.phases.set_phase(&ticket, Phase::VerifyAccount, ttl).await?;

        debug!(identity = %identity, ?flag, "issued verification ticket");
        Ok(ticket)
    }

    /// Mail a fresh verify code and advance the ticket to `SEND_EMAIL`
    ///
    /// A ticket already at `SEND_EMAIL` may re-send; the new code replaces
    /// the old one.
    pub async fn send_email(&self, ticket: &str) -> LinkResult<()> {
        let (subject, flag) = self.ticket_subject(ticket)?;
        let (target, title) = match flag {
            FlowFlag::Register => (
                self.campus_email(&subject.identity),
                "SAST Link registration code",
            ),
            FlowFlag::ResetPassword => {
                let user = self
                    .db
                    .user_by_uid(&subject.identity)
                    .await?
                    .ok_or(LinkError::UserNotFound)?;
                (user.email, "SAST Link password reset code")
            }
            FlowFlag::Login => {
                return Err(LinkError::InvalidInput(
                    "Login tickets do not use email verification".to_string(),
                ))
            }
        };

        self.require_phase(ticket, &[Phase::VerifyAccount, Phase::SendEmail])
            .await?;

        let code = generate_verify_code();
        self.phases
            .set_code(&subject.identity, &code, VERIFY_CODE_TTL)
            .await?;
        self.mailer.send_verify_code(&target, title, &code).await?;
        self.phases
            .set_phase(ticket, Phase::SendEmail, flag.ticket_ttl())
            .await?;

        info!(identity = %subject.identity, ?flag, "verify code sent");
        Ok(())
    }

    /// Compare the submitted code and advance the ticket to `VERIFY_CAPTCHA`
    pub async fn check_verify_code(&self, ticket: &str, submitted: &str) -> LinkResult<()> {
        if submitted.trim().is_empty() {
            return Err(LinkError::InvalidInput("Verify code is required".to_string()));
        }
        let (subject, flag) = self.ticket_subject(ticket)?;
        if flag == FlowFlag::Login {
            return Err(LinkError::InvalidInput(
                "Login tickets do not use email verification".to_string(),
            ));
        }

        self.require_phase(ticket, &[Phase::SendEmail]).await?;

        let stored = self
            .phases
            .code(&subject.identity)
            .await?
            .ok_or(LinkError::CodeExpired)?;
        if stored != normalize_verify_code(submitted) {
            return Err(LinkError::CodeIncorrect);
        }

        self.phases
            .set_phase(ticket, Phase::VerifyCaptcha, flag.ticket_ttl())
            .await
    }

    /// Create the account for a register ticket at `VERIFY_CAPTCHA`
    pub async fn register(&self, ticket: &str, password: &str) -> LinkResult<User> {
        let flag = FlowFlag::Register;
        let identity = self.ticket_identity(ticket, flag)?;
        self.require_phase(ticket, &[Phase::VerifyCaptcha]).await?;
        validate_password(password)?;

        let user = self
            .db
            .create_user_and_profile(NewUser {
                uid: identity.clone(),
                email: self.campus_email(&identity),
                password_hash: hash_password(password)?,
                nickname: identity.clone(),
            })
            .await?;

        self.phases
            .set_phase(ticket, Phase::Success, flag.ticket_ttl())
            .await?;

        info!(uid = %user.uid, user_id = user.id, "account registered");
        Ok(user)
    }

    /// Replace the password for a reset ticket at `VERIFY_CAPTCHA`
    pub async fn reset_password(&self, ticket: &str, new_password: &str) -> LinkResult<()> {
        let flag = FlowFlag::ResetPassword;
        let identity = self.ticket_identity(ticket, flag)?;
        self.require_phase(ticket, &[Phase::VerifyCaptcha]).await?;
        validate_password(new_password)?;

        let user = self
            .db
            .user_by_uid(&identity)
            .await?
            .ok_or(LinkError::UserNotFound)?;
        self.db
            .update_password(user.id, &hash_password(new_password)?)
            .await?;

        self.phases
            .set_phase(ticket, Phase::Success, flag.ticket_ttl())
            .await?;

        info!(uid = %user.uid, "password reset");
        Ok(())
    }

    /// Check the password for a login ticket and issue an access token
    pub async fn login(&self, ticket: &str, password: &str) -> LinkResult<String> {
        let flag = FlowFlag::Login;
        let identity = self.ticket_identity(ticket, flag)?;
        self.require_phase(ticket, &[Phase::VerifyAccount]).await?;

        let user = self
            .db
            .user_by_uid(&identity)
            .await?
            .ok_or(LinkError::UserNotFound)?;
        if !verify_password(password, &user.password_hash)? {
            warn!(uid = %user.uid, "login with wrong password");
            return Err(LinkError::PasswordIncorrect);
        }

        let token = self.issue_access_token(&user, "login").await?;
        self.phases
            .set_phase(ticket, Phase::Success, flag.ticket_ttl())
            .await?;

        info!(uid = %user.uid, "user logged in");
        Ok(token)
    }

    /// Mint an access token for `user` and record it in the allow-list
    ///
    /// Entries that no longer validate are pruned on the way.
    pub async fn issue_access_token(&self, user: &User, description: &str) -> LinkResult<String> {
        let token = self
            .codec
            .issue(&user.uid, Purpose::AccessToken, self.access_token_ttl())?;

        let mut list = load_allow_list(self.db.as_ref(), user.id).await?;
        list.retain(|entry| self.codec.validate(&entry.access_token).is_ok());
        list.push(AccessTokenEntry::new(token.clone(), description));
        store_allow_list(self.db.as_ref(), user.id, &list).await?;

        Ok(token)
    }

    /// Revoke `access_token` by removing it from the owner's allow-list
    pub async fn logout(&self, user_id: i64, access_token: &str) -> LinkResult<()> {
        let mut list = load_allow_list(self.db.as_ref(), user_id).await?;
        if list.remove(access_token) {
            store_allow_list(self.db.as_ref(), user_id, &list).await?;
        }
        Ok(())
    }

    /// Resolve an access token to its account
    ///
    /// The token must verify, carry the access-token purpose, belong to an
    /// existing account, and still be present in that account's allow-list.
    pub async fn authenticate(&self, credential: &str) -> LinkResult<User> {
        if credential.is_empty() {
            return Err(LinkError::NoCredential);
        }
        let identity = self.codec.identity_for(credential, Purpose::AccessToken)?;
        let user = self
            .db
            .user_by_uid(&identity)
            .await?
            .ok_or(LinkError::UserNotFound)?;

        let list = load_allow_list(self.db.as_ref(), user.id).await?;
        if !list.contains(credential) {
            return Err(LinkError::TokenRevoked);
        }
        Ok(user)
    }

    pub fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    pub fn phases(&self) -> &PhaseStore {
        &self.phases
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{KvStore, MemoryStore},
        db::MemoryDatabase,
        mailer::RecordingMailer,
    };

    struct Harness {
        service: AccountService,
        mailer: RecordingMailer,
        kv: MemoryStore,
        db: MemoryDatabase,
    }

    fn harness() -> Harness {
        let config = Arc::new(ServerConfig::for_testing());
        let codec = Arc::new(CredentialCodec::new(&config.authentication.jwt_secret));
        let kv = MemoryStore::new();
        let db = MemoryDatabase::new();
        let mailer = RecordingMailer::new();
        let service = AccountService::new(
            config,
            codec,
            PhaseStore::new(Arc::new(kv.clone())),
            Arc::new(db.clone()),
            Arc::new(mailer.clone()),
        );
        Harness {
            service,
            mailer,
            kv,
            db,
        }
    }

    async fn code_for(h: &Harness, email: &str) -> String {
        h.mailer.last_code_for(email).await.unwrap()
    }

    /// Walk a register ticket up to `VERIFY_CAPTCHA`
    async fn verified_register_ticket(h: &Harness, id: &str) -> String {
        let ticket = h
            .service
            .verify_account(id, FlowFlag::Register)
            .await
            .unwrap();
        h.service.send_email(&ticket).await.unwrap();
        let code = code_for(h, &format!("{}@x.edu", id)).await;
        h.service.check_verify_code(&ticket, &code).await.unwrap();
        ticket
    }

    #[test]
    fn test_register_identity() {
        let h = harness();
        assert_eq!(h.service.register_identity("P2003@x.edu").unwrap(), "p2003");
        assert_eq!(h.service.register_identity(" b2204 ").unwrap(), "b2204");
        assert!(h.service.register_identity("a@gmail.com").is_err());
        assert!(h.service.register_identity("a-b").is_err());
        assert!(h.service.register_identity("@x.edu").is_err());
    }

    #[tokio::test]
    async fn test_verify_account_sets_phase() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u1@x.edu", FlowFlag::Register)
            .await
            .unwrap();
        assert_eq!(
            h.service.phases().phase(&ticket).await.unwrap(),
            Some(Phase::VerifyAccount)
        );
        assert_eq!(
            h.service
                .codec()
                .identity_for(&ticket, Purpose::RegisterTicket)
                .unwrap(),
            "u1"
        );
    }

    #[tokio::test]
    async fn test_verify_account_existence_rules() {
        let h = harness();
        let err = h
            .service
            .verify_account("ghost", FlowFlag::ResetPassword)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::UserNotFound));

        let ticket = verified_register_ticket(&h, "u2").await;
        h.service.register(&ticket, "Abc123!").await.unwrap();

        let err = h
            .service
            .verify_account("u2", FlowFlag::Register)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::UserExists));

        // Login accepts email or bare id
        assert!(h.service.verify_account("U2@x.edu", FlowFlag::Login).await.is_ok());
        assert!(h.service.verify_account("u2", FlowFlag::Login).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_email_stores_code_by_identity() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("p20030101", FlowFlag::Register)
            .await
            .unwrap();
        h.service.send_email(&ticket).await.unwrap();

        assert!(h.kv.contains("VerifyCode:p20030101").await);
        let sent = h.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "p20030101@x.edu");
        assert_eq!(
            h.service.phases().phase(&ticket).await.unwrap(),
            Some(Phase::SendEmail)
        );
    }

    #[tokio::test]
    async fn test_ticket_is_open_until_terminal_step() {
        let h = harness();
        assert!(!h.service.ticket_is_open("").await.unwrap());
        assert!(!h.service.ticket_is_open("unknown").await.unwrap());

        let ticket = verified_register_ticket(&h, "u9").await;
        assert!(h.service.ticket_is_open(&ticket).await.unwrap());
        h.service.register(&ticket, "passw0rd1").await.unwrap();
        assert!(!h.service.ticket_is_open(&ticket).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_code_rejected_after_resend() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u3", FlowFlag::Register)
            .await
            .unwrap();
        h.service.send_email(&ticket).await.unwrap();
        let first = code_for(&h, "u3@x.edu").await;
        // Resend until the generator produces a different code
        let mut second = first.clone();
        for _ in 0..16 {
            h.service.send_email(&ticket).await.unwrap();
            second = code_for(&h, "u3@x.edu").await;
            if second != first {
                break;
            }
        }
        assert_ne!(first, second);

        let err = h
            .service
            .check_verify_code(&ticket, &first)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::CodeIncorrect));
        h.service.check_verify_code(&ticket, &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_code_check_requires_send_email_phase() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u4", FlowFlag::Register)
            .await
            .unwrap();
        h.service.send_email(&ticket).await.unwrap();
        let code = code_for(&h, "u4@x.edu").await;

        h.service
            .phases()
            .set_phase(&ticket, Phase::VerifyAccount, Duration::from_secs(60))
            .await
            .unwrap();
        let err = h
            .service
            .check_verify_code(&ticket, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::PhaseError));
    }

    #[tokio::test]
    async fn test_expired_code() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u5", FlowFlag::Register)
            .await
            .unwrap();
        h.service.send_email(&ticket).await.unwrap();
        h.kv.delete("VerifyCode:u5").await.unwrap();

        let err = h
            .service
            .check_verify_code(&ticket, "S-aaaaa")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::CodeExpired));
    }

    #[tokio::test]
    async fn test_register_requires_verified_ticket_and_rejects_replay() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u6", FlowFlag::Register)
            .await
            .unwrap();
        let err = h.service.register(&ticket, "Abc123!").await.unwrap_err();
        assert!(matches!(err, LinkError::PhaseError));

        h.service.send_email(&ticket).await.unwrap();
        let code = code_for(&h, "u6@x.edu").await;
        h.service.check_verify_code(&ticket, &code).await.unwrap();

        let user = h.service.register(&ticket, "Abc123!").await.unwrap();
        assert_eq!(user.uid, "u6");
        assert_eq!(user.email, "u6@x.edu");
        assert_ne!(user.password_hash, "Abc123!");
        assert!(h.db.profile(user.id).await.unwrap().is_some());
        assert_eq!(
            h.service.phases().phase(&ticket).await.unwrap(),
            Some(Phase::Success)
        );

        let err = h.service.register(&ticket, "Abc123!").await.unwrap_err();
        assert!(matches!(err, LinkError::PhaseError));
    }

    #[tokio::test]
    async fn test_ticket_of_other_flow_rejected() {
        let h = harness();
        let ticket = h
            .service
            .verify_account("u7", FlowFlag::Register)
            .await
            .unwrap();
        let err = h
            .service
            .reset_password(&ticket, "Abc123!")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TicketNotFound));

        let err = h.service.register("garbage", "Abc123!").await.unwrap_err();
        assert!(matches!(err, LinkError::TicketNotFound));
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let h = harness();
        let ticket = verified_register_ticket(&h, "u8").await;
        h.service.register(&ticket, "Abc123!").await.unwrap();

        let reset = h
            .service
            .verify_account("u8@x.edu", FlowFlag::ResetPassword)
            .await
            .unwrap();
        h.service.send_email(&reset).await.unwrap();
        let code = code_for(&h, "u8@x.edu").await;
        h.service.check_verify_code(&reset, &code).await.unwrap();
        h.service.reset_password(&reset, "Xyz789!").await.unwrap();

        let user = h.db.user_by_uid("u8").await.unwrap().unwrap();
        assert!(verify_password("Xyz789!", &user.password_hash).unwrap());

        let err = h
            .service
            .reset_password(&reset, "Qwe456!")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::PhaseError));
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let h = harness();
        let ticket = verified_register_ticket(&h, "u9").await;
        h.service.register(&ticket, "Abc123!").await.unwrap();

        let login = h
            .service
            .verify_account("u9", FlowFlag::Login)
            .await
            .unwrap();
        let err = h.service.login(&login, "Wrong123").await.unwrap_err();
        assert!(matches!(err, LinkError::PasswordIncorrect));

        let token = h.service.login(&login, "Abc123!").await.unwrap();
        let user = h.service.authenticate(&token).await.unwrap();
        assert_eq!(user.uid, "u9");

        // Login tickets are single use
        let err = h.service.login(&login, "Abc123!").await.unwrap_err();
        assert!(matches!(err, LinkError::PhaseError));

        h.service.logout(user.id, &token).await.unwrap();
        let err = h.service.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, LinkError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_tickets_and_empty() {
        let h = harness();
        assert!(matches!(
            h.service.authenticate("").await.unwrap_err(),
            LinkError::NoCredential
        ));

        let ticket = h
            .service
            .verify_account("u10", FlowFlag::Register)
            .await
            .unwrap();
        assert!(matches!(
            h.service.authenticate(&ticket).await.unwrap_err(),
            LinkError::PurposeMismatch
        ));
    }
}
